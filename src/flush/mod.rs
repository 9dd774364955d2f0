pub mod trigger;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{ReplayError, ReplayResult, StorageSink, StoredArtifact};
use crate::ring::{RingWindow, Snapshot};

pub use trigger::{TriggerHandle, TriggerLoop, spawn_trigger_loop};

pub type FlushResult = Result<StoredArtifact, ReplayError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

struct CoordinatorInner {
    sink_name: String,
    sink: Mutex<Box<dyn StorageSink>>,
    in_flight: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Serializes save requests against one storage sink.
///
/// At most one store runs at a time; a request that arrives while another
/// is in flight is rejected with [`ReplayError::FlushInProgress`] rather than
/// queued, so the next save always starts from a fresh snapshot. Flushing
/// an empty window is rejected with [`ReplayError::EmptyWindow`].
#[derive(Clone)]
pub struct FlushCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl FlushCoordinator {
    pub fn new(sink: Box<dyn StorageSink>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                sink_name: sink.name().to_string(),
                sink: Mutex::new(sink),
                in_flight: AtomicBool::new(false),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshots `ring` and persists it, returning once the sink is done.
    pub fn flush(&self, ring: &RingWindow) -> FlushResult {
        self.begin(ring)?.complete()
    }

    /// Claims the in-flight slot and takes the snapshot right now. The
    /// returned [`PendingFlush`] does the slow sink work and may be moved to
    /// another thread.
    pub fn begin(&self, ring: &RingWindow) -> ReplayResult<PendingFlush> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            self.warn("flush rejected, another flush is in flight");
            return Err(ReplayError::FlushInProgress);
        }

        let slot = InFlightSlot {
            inner: self.inner.clone(),
        };

        let snapshot = ring.snapshot();
        if snapshot.is_empty() {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            self.info("flush rejected, window is empty");
            return Err(ReplayError::EmptyWindow);
        }

        self.debug(&format!(
            "snapshot taken: {} segments, {} bytes",
            snapshot.len(),
            snapshot.total_bytes()
        ));

        Ok(PendingFlush { slot, snapshot })
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn sink_name(&self) -> &str {
        &self.inner.sink_name
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }
}

impl ComponentLogger for FlushCoordinator {
    fn log_context(&self) -> LogContext {
        LogContext::new("FlushCoordinator", &self.inner.sink_name)
    }
}

// Releases the in-flight flag on drop, including on unwind.
struct InFlightSlot {
    inner: Arc<CoordinatorInner>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

/// A flush whose snapshot is fixed but which has not reached the sink yet.
pub struct PendingFlush {
    slot: InFlightSlot,
    snapshot: Snapshot,
}

impl PendingFlush {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn complete(self) -> FlushResult {
        let inner = &self.slot.inner;
        let started = Instant::now();

        let result = {
            let mut sink = lock_mutex(&inner.sink, "flush.complete");
            sink.store(&self.snapshot)
        };

        match result {
            Ok(artifact) => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "[flush] stored {} segments ({} bytes) to {:?} in {:?}",
                    artifact.segments,
                    artifact.bytes,
                    artifact.location,
                    started.elapsed()
                );
                Ok(artifact)
            }
            Err(err) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("[flush] sink '{}' failed: {:#}", inner.sink_name, err);
                Err(ReplayError::sink_failure(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Segment;
    use crate::testing::mocks::{GateSink, MockSink};
    use std::time::Duration;

    fn filled_ring(count: u64) -> RingWindow {
        let ring = RingWindow::new(Duration::from_secs(60)).unwrap();
        for i in 0..count {
            ring.append(Segment::new(i, i * 1_000_000_000, vec![i as u8; 2]))
                .unwrap();
        }
        ring
    }

    #[test]
    fn test_flush_hands_snapshot_to_sink() {
        let (sink, stored) = MockSink::new_with_shared("mock");
        let coordinator = FlushCoordinator::new(Box::new(sink));
        let ring = filled_ring(3);

        let artifact = coordinator.flush(&ring).unwrap();
        assert_eq!(artifact.segments, 3);
        assert_eq!(artifact.bytes, 6);

        let stored = stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].len(), 3);
        assert_eq!(coordinator.stats().completed, 1);
        assert!(!coordinator.is_in_flight());
    }

    #[test]
    fn test_empty_window_rejected() {
        let (sink, stored) = MockSink::new_with_shared("mock");
        let coordinator = FlushCoordinator::new(Box::new(sink));
        let ring = filled_ring(0);

        assert_eq!(coordinator.flush(&ring), Err(ReplayError::EmptyWindow));
        assert!(stored.lock().unwrap().is_empty());
        assert!(!coordinator.is_in_flight());
    }

    #[test]
    fn test_second_begin_rejected_while_pending() {
        let (sink, _stored) = MockSink::new_with_shared("mock");
        let coordinator = FlushCoordinator::new(Box::new(sink));
        let ring = filled_ring(2);

        let pending = coordinator.begin(&ring).unwrap();
        assert!(matches!(
            coordinator.begin(&ring),
            Err(ReplayError::FlushInProgress)
        ));

        pending.complete().unwrap();
        assert!(coordinator.begin(&ring).is_ok());
        assert_eq!(coordinator.stats().rejected, 1);
    }

    #[test]
    fn test_dropped_pending_flush_releases_slot() {
        let (sink, stored) = MockSink::new_with_shared("mock");
        let coordinator = FlushCoordinator::new(Box::new(sink));
        let ring = filled_ring(1);

        drop(coordinator.begin(&ring).unwrap());
        assert!(!coordinator.is_in_flight());
        assert!(stored.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sink_error_becomes_sink_failure() {
        let sink = MockSink::failing("broken", "disk full");
        let coordinator = FlushCoordinator::new(Box::new(sink));
        let ring = filled_ring(2);

        match coordinator.flush(&ring) {
            Err(ReplayError::SinkFailure { reason }) => assert!(reason.contains("disk full")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(coordinator.stats().failed, 1);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_snapshot_fixed_at_begin() {
        let (sink, gate) = GateSink::new("gated");
        let coordinator = FlushCoordinator::new(Box::new(sink));
        let ring = std::sync::Arc::new(filled_ring(5));

        let pending = coordinator.begin(&ring).unwrap();
        let worker = std::thread::spawn(move || pending.complete());

        gate.wait_entered();
        for i in 5..20 {
            ring.append(Segment::new(i, i * 1_000_000_000, vec![0u8; 2]))
                .unwrap();
        }
        gate.release();

        let artifact = worker.join().unwrap().unwrap();
        assert_eq!(artifact.segments, 5);
        let stored = gate.stored();
        assert_eq!(stored[0].last().unwrap().sequence(), 4);
    }
}
