// src/lib.rs
pub mod app;
pub mod config;
pub mod core;
pub mod flush;
pub mod producers;
pub mod recorder;
pub mod ring;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use app::{AppStatus, Notice, ReplayApp};
pub use core::{
    CaptureSource, CapturedChunk, ComponentLogger, LogContext, Pull, ReplayError, ReplayResult,
    Segment, StorageSink, StoredArtifact,
};
pub use flush::{FlushCoordinator, FlushResult, PendingFlush};
pub use ring::{RingWindow, Snapshot};
pub use session::{CaptureSession, SessionEvent, SessionState};
