use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::core::lock::{lock_mutex, wait_timeout};

/// Stop flag that sleeping threads can wait on.
///
/// `wait_timeout` returns as soon as `request_stop` is called, which bounds
/// how long a blocked capture pull can delay shutdown.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        *lock_mutex(&self.stopped, "stop_signal.is_stopped")
    }

    pub fn request_stop(&self) {
        let mut stopped = lock_mutex(&self.stopped, "stop_signal.request_stop");
        *stopped = true;
        self.condvar.notify_all();
    }

    /// Sleeps up to `duration`. Returns `true` if stop was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = lock_mutex(&self.stopped, "stop_signal.wait_timeout");
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = wait_timeout(
                &self.condvar,
                stopped,
                deadline - now,
                "stop_signal.wait_timeout",
            );
        }
        *stopped
    }
}
