pub mod snapshot;
pub mod window;

pub use snapshot::Snapshot;
pub use window::{RingWindow, WindowStats};
