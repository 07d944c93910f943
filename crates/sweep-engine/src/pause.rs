//! Cooperative, level-triggered pause gate shared by the controller and workers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A shared `set`/`cleared` flag. Last write wins; readers always see the
/// current value.
#[derive(Debug, Default)]
pub struct PauseSignal {
    paused: Mutex<bool>,
    changed: Condvar,
}

impl PauseSignal {
    /// A cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock still holds a valid bool.
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pause: workers stop taking new cells.
    pub fn set(&self) {
        *self.flag() = true;
        self.changed.notify_all();
    }

    /// Resume.
    pub fn clear(&self) {
        *self.flag() = false;
        self.changed.notify_all();
    }

    /// Flip the flag; returns the new state (`true` = paused).
    pub fn toggle(&self) -> bool {
        let mut guard = self.flag();
        *guard = !*guard;
        self.changed.notify_all();
        *guard
    }

    /// Current state.
    pub fn is_set(&self) -> bool {
        *self.flag()
    }

    /// Block while the signal is set. Returns whether it had to wait at all.
    pub fn wait_while_set(&self) -> bool {
        let guard = self.flag();
        if !*guard {
            return false;
        }
        let _guard = self
            .changed
            .wait_while(guard, |paused| *paused)
            .unwrap_or_else(PoisonError::into_inner);
        true
    }

    /// Like [`PauseSignal::wait_while_set`] but gives up after `timeout`.
    /// Returns `true` if the signal is clear on return.
    pub fn wait_while_set_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.flag();
        while *guard {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
