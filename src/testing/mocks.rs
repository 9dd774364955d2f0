use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::core::lock::lock_mutex;
use crate::core::timestamp::{NS_PER_SEC, secs_to_ns};
use crate::core::{CaptureSource, CapturedChunk, Pull, StorageSink, StoredArtifact};
use crate::producers::wait::StopSignal;
use crate::ring::Snapshot;

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

enum Script {
    Endless { interval: Duration, next_ns: u64 },
    Scripted { chunks: VecDeque<u64>, fail_with: Option<String> },
}

/// Capture source with canned behaviour.
pub struct MockSource {
    name: String,
    script: Script,
    open_error: Option<String>,
    closed: Arc<Mutex<bool>>,
}

impl MockSource {
    /// One chunk every 2ms, forever, 1s apart in capture time.
    pub fn endless(name: &str) -> Self {
        Self::with_script(
            name,
            Script::Endless {
                interval: Duration::from_millis(2),
                next_ns: 0,
            },
        )
    }

    /// Emits one chunk per entry (seconds), then ends.
    pub fn from_secs(name: &str, secs: &[u64]) -> Self {
        Self::with_script(
            name,
            Script::Scripted {
                chunks: secs.iter().copied().collect(),
                fail_with: None,
            },
        )
    }

    /// Emits one chunk per entry (seconds), then fails with `reason`.
    pub fn failing_after(name: &str, secs: &[u64], reason: &str) -> Self {
        Self::with_script(
            name,
            Script::Scripted {
                chunks: secs.iter().copied().collect(),
                fail_with: Some(reason.to_string()),
            },
        )
    }

    pub fn failing_open(reason: &str) -> Self {
        let mut source = Self::from_secs("unopenable", &[]);
        source.open_error = Some(reason.to_string());
        source
    }

    /// Shared flag flipped when the session closes this source.
    pub fn closed_flag(&self) -> Arc<Mutex<bool>> {
        self.closed.clone()
    }

    fn with_script(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            open_error: None,
            closed: Arc::new(Mutex::new(false)),
        }
    }
}

fn chunk_at(secs: u64) -> CapturedChunk {
    CapturedChunk::new(secs_to_ns(secs), secs.to_le_bytes().to_vec())
}

impl CaptureSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        match &self.open_error {
            Some(reason) => Err(anyhow!("{}", reason)),
            None => Ok(()),
        }
    }

    fn pull(&mut self, stop: &StopSignal) -> Result<Pull> {
        match &mut self.script {
            Script::Endless { interval, next_ns } => {
                if stop.wait_timeout(*interval) {
                    return Ok(Pull::Idle);
                }
                let captured_ns = *next_ns;
                *next_ns += NS_PER_SEC;
                Ok(Pull::Chunk(CapturedChunk::new(captured_ns, vec![0xAB; 8])))
            }
            Script::Scripted { chunks, fail_with } => match chunks.pop_front() {
                Some(secs) => Ok(Pull::Chunk(chunk_at(secs))),
                None => match fail_with.take() {
                    Some(reason) => Err(anyhow!("{}", reason)),
                    None => Ok(Pull::End),
                },
            },
        }
    }

    fn close(&mut self) {
        *lock_mutex(&self.closed, "mock_source.close") = true;
    }
}

enum Feed {
    Chunk(CapturedChunk),
    Fail(String),
    End,
}

/// Test-side handle that pushes chunks into a [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelFeed {
    tx: Sender<Feed>,
}

impl ChannelFeed {
    pub fn push_secs(&self, secs: u64) {
        let _ = self.tx.send(Feed::Chunk(chunk_at(secs)));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Feed::Fail(reason.to_string()));
    }

    pub fn end(&self) {
        let _ = self.tx.send(Feed::End);
    }
}

/// Capture source driven step by step from a test.
pub struct ChannelSource {
    name: String,
    rx: Receiver<Feed>,
    poll: Duration,
}

impl ChannelSource {
    pub fn new(name: &str) -> (Self, ChannelFeed) {
        let (tx, rx) = unbounded();
        (
            Self {
                name: name.to_string(),
                rx,
                poll: Duration::from_millis(5),
            },
            ChannelFeed { tx },
        )
    }
}

impl CaptureSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn pull(&mut self, stop: &StopSignal) -> Result<Pull> {
        if stop.is_stopped() {
            return Ok(Pull::Idle);
        }
        match self.rx.recv_timeout(self.poll) {
            Ok(Feed::Chunk(chunk)) => Ok(Pull::Chunk(chunk)),
            Ok(Feed::Fail(reason)) => Err(anyhow!("{}", reason)),
            Ok(Feed::End) | Err(RecvTimeoutError::Disconnected) => Ok(Pull::End),
            Err(RecvTimeoutError::Timeout) => Ok(Pull::Idle),
        }
    }
}

/// Sink that records every snapshot it is given.
pub struct MockSink {
    name: String,
    stored: Arc<Mutex<Vec<Snapshot>>>,
    fail_with: Option<String>,
}

impl MockSink {
    pub fn new(name: &str) -> Self {
        Self::new_with_shared(name).0
    }

    pub fn new_with_shared(name: &str) -> (Self, Arc<Mutex<Vec<Snapshot>>>) {
        let stored = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.to_string(),
                stored: stored.clone(),
                fail_with: None,
            },
            stored,
        )
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        let mut sink = Self::new(name);
        sink.fail_with = Some(reason.to_string());
        sink
    }
}

fn artifact_for(name: &str, index: usize, snapshot: &Snapshot) -> StoredArtifact {
    StoredArtifact {
        location: PathBuf::from(format!("mock://{}/{}", name, index)),
        segments: snapshot.len(),
        bytes: snapshot.total_bytes(),
    }
}

impl StorageSink for MockSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&mut self, snapshot: &Snapshot) -> Result<StoredArtifact> {
        if let Some(reason) = &self.fail_with {
            return Err(anyhow!("{}", reason));
        }
        let mut stored = lock_mutex(&self.stored, "mock_sink.store");
        stored.push(snapshot.clone());
        Ok(artifact_for(&self.name, stored.len(), snapshot))
    }
}

#[derive(Default)]
struct GateState {
    entered: usize,
    released: bool,
    stored: Vec<Snapshot>,
}

/// Test-side control for a [`GateSink`].
#[derive(Clone)]
pub struct GateControl {
    state: Arc<(Mutex<GateState>, Condvar)>,
}

impl GateControl {
    /// Blocks until a store call is parked inside the sink.
    pub fn wait_entered(&self) {
        let (lock, condvar) = &*self.state;
        let mut g = lock_mutex(lock, "gate.wait_entered");
        while g.entered == 0 {
            g = condvar.wait(g).unwrap_or_else(|p| p.into_inner());
        }
    }

    pub fn release(&self) {
        let (lock, condvar) = &*self.state;
        lock_mutex(lock, "gate.release").released = true;
        condvar.notify_all();
    }

    pub fn entered(&self) -> usize {
        lock_mutex(&self.state.0, "gate.entered").entered
    }

    pub fn stored(&self) -> Vec<Snapshot> {
        lock_mutex(&self.state.0, "gate.stored").stored.clone()
    }
}

/// Sink whose store blocks until the test releases it, standing in for a
/// slow disk write.
pub struct GateSink {
    name: String,
    state: Arc<(Mutex<GateState>, Condvar)>,
}

impl GateSink {
    pub fn new(name: &str) -> (Self, GateControl) {
        let state = Arc::new((Mutex::new(GateState::default()), Condvar::new()));
        (
            Self {
                name: name.to_string(),
                state: state.clone(),
            },
            GateControl { state },
        )
    }
}

impl StorageSink for GateSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&mut self, snapshot: &Snapshot) -> Result<StoredArtifact> {
        let (lock, condvar) = &*self.state;
        let mut g = lock_mutex(lock, "gate.store");
        g.entered += 1;
        condvar.notify_all();
        while !g.released {
            g = condvar.wait(g).unwrap_or_else(|p| p.into_inner());
        }
        g.stored.push(snapshot.clone());
        Ok(artifact_for(&self.name, g.stored.len(), snapshot))
    }
}
