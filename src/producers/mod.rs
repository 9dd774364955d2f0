pub mod file;
pub mod pattern;
pub mod wait;

use std::time::Duration;

use anyhow::bail;

use crate::config::{SourceConfig, SourceKind};
use crate::core::CaptureSource;

pub use file::FileSource;
pub use pattern::PatternSource;
pub use wait::StopSignal;

/// Builds the capture source described by `cfg`.
pub fn build_source(cfg: &SourceConfig) -> anyhow::Result<Box<dyn CaptureSource>> {
    let interval = Duration::from_millis(cfg.interval_ms);
    match cfg.kind {
        SourceKind::Pattern => Ok(Box::new(PatternSource::new(
            "pattern",
            interval,
            cfg.chunk_bytes,
        ))),
        SourceKind::File => {
            let Some(path) = cfg.path.as_ref() else {
                bail!("file source requires source.path");
            };
            Ok(Box::new(FileSource::new(
                "file",
                path,
                cfg.chunk_bytes,
                interval,
                cfg.loop_file,
            )))
        }
    }
}
