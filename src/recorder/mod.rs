use std::time::SystemTime;

pub mod catalog;
pub mod retention_fs;
pub mod sink_fs;

pub use catalog::{Catalog, RecordingEntry};
pub use retention_fs::FsRetention;
pub use sink_fs::FsSink;

/// Marker for files still being written by [`FsSink`].
pub const PARTIAL_SUFFIX: &str = ".partial";

pub trait RetentionPolicy: Send {
    /// Returns how many artifacts were removed.
    fn run(&mut self, now: SystemTime) -> anyhow::Result<usize>;
}
