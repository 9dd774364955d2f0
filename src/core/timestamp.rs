use std::sync::OnceLock;
use std::time::{Duration, Instant};

pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Monotonic nanosecond clock anchored at first use in this process.
///
/// Capture timestamps come from here, never from wall-clock time, so the
/// retention window is immune to clock adjustments.
#[derive(Debug, Clone, Copy)]
pub struct MonoClock {
    origin: Instant,
}

impl MonoClock {
    pub fn process() -> Self {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        Self {
            origin: *ORIGIN.get_or_init(Instant::now),
        }
    }

    pub fn now_ns(&self) -> u64 {
        duration_to_ns(self.origin.elapsed())
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::process()
    }
}

pub fn duration_to_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

pub fn secs_to_ns(secs: u64) -> u64 {
    secs.saturating_mul(NS_PER_SEC)
}

pub fn format_ns(ns: u64) -> String {
    format!("{}.{:03}s", ns / NS_PER_SEC, (ns % NS_PER_SEC) / 1_000_000)
}

/// Wall-clock milliseconds, used only for naming saved artifacts.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
