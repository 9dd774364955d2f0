use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;

use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::{CaptureSource, Pull, ReplayError, ReplayResult, Segment};
use crate::producers::wait::StopSignal;
use crate::ring::RingWindow;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Capturing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { session_id: u64, source: String },
    Stopped { session_id: u64 },
    SourceEnded { session_id: u64 },
    SourceFailed { session_id: u64, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub state: SessionState,
    pub session_id: Option<u64>,
    pub source: Option<String>,
    pub segments_ingested: u64,
    pub segments_rejected: u64,
}

// State the ingestion thread and the owning handle both touch.
struct Shared {
    state: Mutex<SessionState>,
    failure: Mutex<Option<ReplayError>>,
    ingested: AtomicU64,
    rejected: AtomicU64,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *lock_mutex(&self.state, "session.set_state") = state;
    }

    fn publish(&self, event: SessionEvent) {
        let mut subscribers = lock_mutex(&self.subscribers, "session.publish");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct ActiveCapture {
    session_id: u64,
    source_name: String,
    ring: Arc<RingWindow>,
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

/// Drives one capture source into a [`RingWindow`].
///
/// `Idle -> Capturing -> Idle`. A source failure drops the session back to
/// `Idle` on its own but leaves the buffered segments in place.
pub struct CaptureSession {
    shared: Arc<Shared>,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                failure: Mutex::new(None),
                ingested: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
            active: None,
        }
    }

    pub fn start(
        &mut self,
        mut source: Box<dyn CaptureSource>,
        ring: Arc<RingWindow>,
    ) -> ReplayResult<()> {
        if self.status() == SessionState::Capturing {
            return Err(ReplayError::AlreadyCapturing);
        }
        // A previous run that ended on its own still has a thread to reap.
        self.reap();

        let source_name = source.name().to_string();
        if let Err(e) = source.open() {
            let err = ReplayError::source_failure(&source_name, e);
            self.error(&format!("open failed: {}", err));
            return Err(err);
        }

        if let Err(e) = ring.begin_capture() {
            source.close();
            return Err(e);
        }

        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(StopSignal::new());

        *lock_mutex(&self.shared.failure, "session.start") = None;
        self.shared.ingested.store(0, Ordering::Relaxed);
        self.shared.rejected.store(0, Ordering::Relaxed);
        self.shared.set_state(SessionState::Capturing);

        let ingest = Ingest {
            session_id,
            source,
            ring: ring.clone(),
            stop: stop.clone(),
            shared: self.shared.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", session_id))
            .spawn(move || ingest.run());

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                // The source went down with the closure; nothing left to close.
                ring.end_capture();
                self.shared.set_state(SessionState::Idle);
                return Err(ReplayError::source_failure(&source_name, e));
            }
        };

        self.active = Some(ActiveCapture {
            session_id,
            source_name: source_name.clone(),
            ring,
            stop,
            thread,
        });

        self.shared.publish(SessionEvent::Started {
            session_id,
            source: source_name,
        });
        self.info("capture started");
        Ok(())
    }

    /// Stops ingestion and releases the source. A no-op when already idle.
    /// The window keeps its segments so a save after stop still works.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        let was_capturing = self.status() == SessionState::Capturing;
        active.stop.request_stop();
        if active.thread.join().is_err() {
            self.error("ingestion thread panicked");
        }
        active.ring.end_capture();
        self.shared.set_state(SessionState::Idle);

        if was_capturing {
            self.shared.publish(SessionEvent::Stopped {
                session_id: active.session_id,
            });
            log::info!(
                "[session] capture {} stopped ({} segments ingested)",
                active.session_id,
                self.shared.ingested.load(Ordering::Relaxed)
            );
        }
    }

    pub fn status(&self) -> SessionState {
        *lock_mutex(&self.shared.state, "session.status")
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.status(),
            session_id: self.active.as_ref().map(|a| a.session_id),
            source: self.active.as_ref().map(|a| a.source_name.clone()),
            segments_ingested: self.shared.ingested.load(Ordering::Relaxed),
            segments_rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }

    /// Returns and clears the error that ended the last capture, if any.
    pub fn take_failure(&self) -> Option<ReplayError> {
        lock_mutex(&self.shared.failure, "session.take_failure").take()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        lock_mutex(&self.shared.subscribers, "session.subscribe").push(tx);
        rx
    }

    fn reap(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.request_stop();
            let _ = active.thread.join();
            active.ring.end_capture();
        }
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ComponentLogger for CaptureSession {
    fn log_context(&self) -> LogContext {
        match &self.active {
            Some(active) => {
                LogContext::new("Session", &active.source_name).with_session(active.session_id)
            }
            None => LogContext::new("Session", "idle"),
        }
    }
}

// Everything the ingestion thread owns.
struct Ingest {
    session_id: u64,
    source: Box<dyn CaptureSource>,
    ring: Arc<RingWindow>,
    stop: Arc<StopSignal>,
    shared: Arc<Shared>,
}

impl Ingest {
    fn run(mut self) {
        let mut next_sequence: u64 = 0;

        let outcome = loop {
            if self.stop.is_stopped() {
                break Ok(false);
            }

            match self.source.pull(&self.stop) {
                Ok(Pull::Chunk(chunk)) => {
                    let segment = Segment::new(next_sequence, chunk.captured_ns, chunk.payload);
                    match self.ring.append(segment) {
                        Ok(_) => {
                            next_sequence += 1;
                            self.shared.ingested.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                            log::warn!(
                                "[session {}] dropped chunk from '{}': {}",
                                self.session_id,
                                self.source.name(),
                                e
                            );
                        }
                    }
                }
                Ok(Pull::Idle) => {}
                Ok(Pull::End) => break Ok(true),
                Err(e) => break Err(ReplayError::source_failure(self.source.name(), e)),
            }
        };

        self.source.close();

        match outcome {
            Ok(false) => {}
            Ok(true) => {
                self.ring.end_capture();
                self.shared.set_state(SessionState::Idle);
                log::info!(
                    "[session {}] source '{}' ended",
                    self.session_id,
                    self.source.name()
                );
                self.shared.publish(SessionEvent::SourceEnded {
                    session_id: self.session_id,
                });
            }
            Err(err) => {
                self.ring.end_capture();
                log::error!("[session {}] {}", self.session_id, err);
                *lock_mutex(&self.shared.failure, "session.ingest.failure") = Some(err.clone());
                self.shared.set_state(SessionState::Idle);
                self.shared.publish(SessionEvent::SourceFailed {
                    session_id: self.session_id,
                    reason: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockSource, wait_until};
    use std::time::Duration;

    fn ring() -> Arc<RingWindow> {
        Arc::new(RingWindow::new(Duration::from_secs(300)).unwrap())
    }

    #[test]
    fn test_stop_on_idle_is_noop() {
        let mut session = CaptureSession::new();
        session.stop();
        session.stop();
        assert_eq!(session.status(), SessionState::Idle);
        assert!(session.take_failure().is_none());
    }

    #[test]
    fn test_start_twice_fails() {
        let ring = ring();
        let mut session = CaptureSession::new();
        session
            .start(Box::new(MockSource::endless("a")), ring.clone())
            .unwrap();

        let second = session.start(Box::new(MockSource::endless("b")), ring.clone());
        assert_eq!(second, Err(ReplayError::AlreadyCapturing));

        session.stop();
        assert_eq!(session.status(), SessionState::Idle);
        assert!(!ring.is_capturing());
    }

    #[test]
    fn test_open_failure_leaves_session_idle() {
        let ring = ring();
        let mut session = CaptureSession::new();
        let result = session.start(Box::new(MockSource::failing_open("denied")), ring.clone());

        assert!(matches!(result, Err(ReplayError::SourceFailure { .. })));
        assert_eq!(session.status(), SessionState::Idle);
        assert!(!ring.is_capturing());
    }

    #[test]
    fn test_source_end_returns_to_idle() {
        let ring = ring();
        let mut session = CaptureSession::new();
        let events = session.subscribe();
        session
            .start(Box::new(MockSource::from_secs("finite", &[0, 1, 2])), ring.clone())
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || session.status()
            == SessionState::Idle));
        assert_eq!(ring.len(), 3);
        assert!(session.take_failure().is_none());

        let timeout = Duration::from_secs(1);
        assert!(matches!(
            events.recv_timeout(timeout).unwrap(),
            SessionEvent::Started { .. }
        ));
        assert!(matches!(
            events.recv_timeout(timeout).unwrap(),
            SessionEvent::SourceEnded { .. }
        ));
    }

    #[test]
    fn test_out_of_order_chunk_is_dropped_not_fatal() {
        let ring = ring();
        let mut session = CaptureSession::new();
        session
            .start(Box::new(MockSource::from_secs("jumpy", &[0, 5, 3, 6])), ring.clone())
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || session.status()
            == SessionState::Idle));
        let stats = session.stats();
        assert_eq!(stats.segments_ingested, 3);
        assert_eq!(stats.segments_rejected, 1);
        assert_eq!(ring.len(), 3);
    }
}
