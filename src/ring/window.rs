use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::timestamp::{duration_to_ns, format_ns};
use crate::core::{ReplayError, ReplayResult, Segment};
use crate::ring::Snapshot;

struct Inner {
    window_ns: u64,
    segments: VecDeque<Segment>,
    bytes: u64,
    last_sequence: Option<u64>,
    capturing: bool,
    appended_total: u64,
    evicted_total: u64,
}

impl Inner {
    fn span_ns(&self) -> u64 {
        match (self.segments.front(), self.segments.back()) {
            (Some(oldest), Some(newest)) => newest.captured_ns() - oldest.captured_ns(),
            _ => 0,
        }
    }

    // Drops from the front until the span fits the window. The newest
    // segment always survives, even if the window is shorter than one segment.
    fn evict_expired(&mut self) -> usize {
        let mut evicted = 0;
        while self.segments.len() > 1 && self.span_ns() > self.window_ns {
            if let Some(old) = self.segments.pop_front() {
                self.bytes -= old.len() as u64;
                evicted += 1;
            }
        }
        self.evicted_total += evicted as u64;
        evicted
    }

    fn clear(&mut self) {
        self.segments.clear();
        self.bytes = 0;
        self.last_sequence = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStats {
    pub window_ns: u64,
    pub segments: usize,
    pub bytes: u64,
    pub span_ns: u64,
    pub oldest_sequence: Option<u64>,
    pub newest_sequence: Option<u64>,
    pub appended_total: u64,
    pub evicted_total: u64,
    pub capturing: bool,
}

/// Rolling buffer that keeps only the trailing `window` of captured media.
///
/// Every operation is one short critical section over the segment deque;
/// snapshots copy segment handles only, never payload bytes.
pub struct RingWindow {
    name: String,
    inner: Mutex<Inner>,
}

impl RingWindow {
    pub fn new(window: Duration) -> ReplayResult<Self> {
        Self::with_name("replay", window)
    }

    pub fn with_name(name: &str, window: Duration) -> ReplayResult<Self> {
        let window_ns = duration_to_ns(window);
        if window_ns == 0 {
            return Err(ReplayError::InvalidWindow);
        }

        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(Inner {
                window_ns,
                segments: VecDeque::new(),
                bytes: 0,
                last_sequence: None,
                capturing: false,
                appended_total: 0,
                evicted_total: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `segment` and evicts whatever fell out of the window.
    /// Returns the number of evicted segments.
    pub fn append(&self, segment: Segment) -> ReplayResult<usize> {
        let sequence = segment.sequence();
        let (evicted, retained) = {
            let mut g = lock_mutex(&self.inner, "ring_window.append");

            let last_captured_ns = g.segments.back().map(Segment::captured_ns);
            if g.last_sequence.is_some_and(|last| sequence <= last)
                || last_captured_ns.is_some_and(|last| segment.captured_ns() < last)
            {
                return Err(ReplayError::OutOfOrder {
                    sequence,
                    captured_ns: segment.captured_ns(),
                    last_sequence: g.last_sequence.unwrap_or_default(),
                    last_captured_ns: last_captured_ns.unwrap_or_default(),
                });
            }

            g.bytes += segment.len() as u64;
            g.last_sequence = Some(sequence);
            g.appended_total += 1;
            g.segments.push_back(segment);

            let evicted = g.evict_expired();
            (evicted, g.segments.len())
        };

        if sequence % 50 == 0 || sequence < 5 {
            self.debug(&format!(
                "append[seq={}] retained={} evicted={}",
                sequence, retained, evicted
            ));
        }

        Ok(evicted)
    }

    pub fn snapshot(&self) -> Snapshot {
        let g = lock_mutex(&self.inner, "ring_window.snapshot");
        Snapshot::new(g.segments.iter().cloned().collect())
    }

    pub fn clear(&self) {
        let released = {
            let mut g = lock_mutex(&self.inner, "ring_window.clear");
            let released = g.segments.len();
            g.clear();
            released
        };
        self.debug(&format!("cleared {} segments", released));
    }

    pub fn len(&self) -> usize {
        lock_mutex(&self.inner, "ring_window.len").segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window(&self) -> Duration {
        Duration::from_nanos(lock_mutex(&self.inner, "ring_window.window").window_ns)
    }

    /// Changes the retention length. Only allowed between sessions; a
    /// shorter window trims retained segments right away.
    pub fn set_window(&self, window: Duration) -> ReplayResult<()> {
        let window_ns = duration_to_ns(window);
        if window_ns == 0 {
            return Err(ReplayError::InvalidWindow);
        }

        let evicted = {
            let mut g = lock_mutex(&self.inner, "ring_window.set_window");
            if g.capturing {
                return Err(ReplayError::WindowLocked);
            }
            g.window_ns = window_ns;
            g.evict_expired()
        };

        self.info(&format!(
            "window set to {} (trimmed {} segments)",
            format_ns(window_ns),
            evicted
        ));
        Ok(())
    }

    /// Claims the window for a capture session: clears leftovers from the
    /// previous session and locks the window duration.
    pub fn begin_capture(&self) -> ReplayResult<()> {
        let mut g = lock_mutex(&self.inner, "ring_window.begin_capture");
        if g.capturing {
            return Err(ReplayError::AlreadyCapturing);
        }
        g.clear();
        g.capturing = true;
        Ok(())
    }

    /// Releases the session claim. Retained segments stay for a late flush.
    pub fn end_capture(&self) {
        lock_mutex(&self.inner, "ring_window.end_capture").capturing = false;
    }

    pub fn is_capturing(&self) -> bool {
        lock_mutex(&self.inner, "ring_window.is_capturing").capturing
    }

    pub fn stats(&self) -> WindowStats {
        let g = lock_mutex(&self.inner, "ring_window.stats");
        WindowStats {
            window_ns: g.window_ns,
            segments: g.segments.len(),
            bytes: g.bytes,
            span_ns: g.span_ns(),
            oldest_sequence: g.segments.front().map(Segment::sequence),
            newest_sequence: g.segments.back().map(Segment::sequence),
            appended_total: g.appended_total,
            evicted_total: g.evicted_total,
            capturing: g.capturing,
        }
    }
}

impl ComponentLogger for RingWindow {
    fn log_context(&self) -> LogContext {
        LogContext::new("RingWindow", &self.name)
    }
}
