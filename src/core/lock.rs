use std::sync::{Condvar, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

const LOCK_RETRY_DELAY: Duration = Duration::from_micros(200);

fn log_poisoned(context: &str) {
    log::error!("Mutex poisoned in {}, recovering inner state", context);
}

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub fn lock_mutex<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log_poisoned(context);
            poisoned.into_inner()
        }
    }
}

pub fn lock_mutex_with_timeout<'a, T>(
    mutex: &'a Mutex<T>,
    context: &str,
    timeout: Duration,
) -> Option<MutexGuard<'a, T>> {
    let start = Instant::now();
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => {
                log_poisoned(context);
                return Some(poisoned.into_inner());
            }
            Err(TryLockError::WouldBlock) => {
                if start.elapsed() >= timeout {
                    log::warn!("Mutex lock timed out after {:?} in {}", timeout, context);
                    return None;
                }
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
        }
    }
}

/// `Condvar::wait_timeout` with the same poison recovery as [`lock_mutex`].
pub fn wait_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    context: &str,
) -> MutexGuard<'a, T> {
    match condvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => {
            log_poisoned(context);
            poisoned.into_inner().0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_recovers_from_poison() {
        let shared = Arc::new(Mutex::new(5u32));
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison it");
        })
        .join();

        assert!(shared.is_poisoned());
        let guard = lock_mutex(&shared, "test");
        assert_eq!(*guard, 5);
    }

    #[test]
    fn test_lock_with_timeout_gives_up() {
        let shared = Mutex::new(());
        let _held = shared.lock().unwrap();
        let attempt = lock_mutex_with_timeout(&shared, "test", Duration::from_millis(5));
        assert!(attempt.is_none());
    }
}
