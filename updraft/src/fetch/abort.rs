//! Cooperative cancellation for blocking transfers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Poll interval used by [`AbortSignal::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct AbortState {
    requested: AtomicBool,
    active: Mutex<usize>,
    idle: Condvar,
}

/// Shared cancellation flag plus a count of in-flight network operations.
///
/// Cloning is cheap; every clone observes the same state.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Transfers stop at their next block boundary.
    pub fn request(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Block until no network operation is in flight.
    pub fn wait_idle(&self) {
        let mut active = self.state.active.lock();
        while *active > 0 {
            self.state.idle.wait(&mut active);
        }
    }

    /// Number of in-flight operations.
    pub fn active_operations(&self) -> usize {
        *self.state.active.lock()
    }

    /// Mark a network operation as in flight until the guard drops.
    pub(crate) fn enter(&self) -> ActiveOperation {
        *self.state.active.lock() += 1;
        ActiveOperation {
            state: Arc::clone(&self.state),
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` when
    /// the sleep was cut short by an abort request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Guard for one in-flight network operation.
#[derive(Debug)]
pub(crate) struct ActiveOperation {
    state: Arc<AbortState>,
}

impl Drop for ActiveOperation {
    fn drop(&mut self) {
        let mut active = self.state.active.lock();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.state.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_request_is_shared_across_clones() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_requested());
        signal.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn test_wait_idle_returns_immediately_without_operations() {
        let signal = AbortSignal::new();
        signal.wait_idle();
        assert_eq!(signal.active_operations(), 0);
    }

    #[test]
    fn test_wait_idle_blocks_until_guard_drops() {
        let signal = AbortSignal::new();
        let guard = signal.enter();
        assert_eq!(signal.active_operations(), 1);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(guard);
        });

        signal.wait_idle();
        assert_eq!(signal.active_operations(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_sleep_is_cut_short() {
        let signal = AbortSignal::new();
        assert!(signal.sleep(Duration::from_millis(1)));
        signal.request();
        let started = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
