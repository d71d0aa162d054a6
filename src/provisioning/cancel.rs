use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared flag that interrupts polling loops, including while they sleep.
///
/// Clones observe the same flag. Once cancelled a token stays cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, signal) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Parks the calling thread for `duration` or until cancelled.
    /// Returns `true` when the wait ended because of cancellation.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, signal) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = signal
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancelled = guard;
        }
        true
    }
}
