pub mod error;
pub mod lock;
pub mod logging;
pub mod timestamp;

use std::path::PathBuf;

use bytes::Bytes;

pub use error::{ReplayError, ReplayResult};
pub use logging::{ComponentLogger, LogContext};
pub use timestamp::*;

use crate::producers::wait::StopSignal;
use crate::ring::Snapshot;

/// One timestamped chunk of already-encoded media.
///
/// Segments are immutable once built. Cloning shares the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    sequence: u64,
    captured_ns: u64,
    payload: Bytes,
}

impl Segment {
    pub fn new(sequence: u64, captured_ns: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            captured_ns,
            payload: payload.into(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Monotonic capture time in nanoseconds (see [`MonoClock`]).
    pub fn captured_ns(&self) -> u64 {
        self.captured_ns
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// What a capture source hands over; the session assigns the sequence.
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub captured_ns: u64,
    pub payload: Bytes,
}

impl CapturedChunk {
    pub fn new(captured_ns: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            captured_ns,
            payload: payload.into(),
        }
    }
}

/// Outcome of a single pull from a capture source.
#[derive(Debug)]
pub enum Pull {
    Chunk(CapturedChunk),
    /// Nothing ready yet (timed out or woken by stop); ask again.
    Idle,
    /// The stream finished normally.
    End,
}

pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Blocks for at most one pacing interval. Implementations must wait
    /// through `stop.wait_timeout` so a stop request cuts the wait short.
    fn pull(&mut self, stop: &StopSignal) -> anyhow::Result<Pull>;

    fn close(&mut self) {}
}

/// Where a persisted snapshot ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub location: PathBuf,
    pub segments: usize,
    pub bytes: u64,
}

/// Durable destination for snapshots. Calls are never overlapped by the
/// flush coordinator, so implementations need not be reentrant.
pub trait StorageSink: Send {
    fn name(&self) -> &str;
    fn store(&mut self, snapshot: &Snapshot) -> anyhow::Result<StoredArtifact>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_clone_shares_payload() {
        let seg = Segment::new(7, 1_000, vec![1u8, 2, 3]);
        let copy = seg.clone();

        assert_eq!(copy.sequence(), 7);
        assert_eq!(copy.captured_ns(), 1_000);
        assert_eq!(copy.payload().as_ptr(), seg.payload().as_ptr());
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn test_empty_segment() {
        let seg = Segment::new(0, 0, Bytes::new());
        assert!(seg.is_empty());
    }
}
