//! Interruptible sleeping between retry attempts.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Signal that cuts retry sleeps short.
///
/// Clones share the same signal. [`Interrupt::sleep`] fails once the
/// signal was raised and not [reset](Interrupt::reset) since, which suits
/// a token owned by one caller. An [`InterruptWatch`] taken from a shared
/// signal only reacts to raises that happen after it was taken, so one
/// interrupt stops the operations running at that moment and nothing
/// started later.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<Raises>,
    wake: Condvar,
}

#[derive(Debug, Default, Clone, Copy)]
struct Raises {
    /// Total raises, never decreases.
    count: u64,
    /// Value of `count` at the last reset.
    cleared: u64,
}

impl Interrupt {
    /// Creates a lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every sleeper.
    pub fn interrupt(&self) {
        let mut state = self.inner.state.lock();
        state.count += 1;
        self.inner.wake.notify_all();
    }

    /// Checks if the signal was raised since the last reset.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        let state = self.inner.state.lock();
        state.count > state.cleared
    }

    /// Lowers the signal.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.cleared = state.count;
    }

    /// Starts observing raises from this point on.
    #[must_use]
    pub fn watch(&self) -> InterruptWatch {
        InterruptWatch {
            interrupt: self.clone(),
            seen: self.inner.state.lock().count,
        }
    }

    /// Blocks for `duration` unless the signal is or becomes raised.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Interrupted`] if the signal was raised.
    pub fn sleep(&self, duration: Duration) -> CoreResult<()> {
        self.sleep_until(duration, |state| state.count > state.cleared)
    }

    fn sleep_until(&self, duration: Duration, raised: impl Fn(&Raises) -> bool) -> CoreResult<()> {
        let mut state = self.inner.state.lock();
        match Instant::now().checked_add(duration) {
            Some(deadline) => {
                while !raised(&state) {
                    if self.inner.wake.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
            // Too far out to represent: only an interrupt ends the sleep.
            None => {
                while !raised(&state) {
                    self.inner.wake.wait(&mut state);
                }
            }
        }
        if raised(&state) {
            Err(CoreError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// View of an [`Interrupt`] that ignores raises from before it was taken.
#[derive(Debug, Clone)]
pub struct InterruptWatch {
    interrupt: Interrupt,
    seen: u64,
}

impl InterruptWatch {
    /// Checks if the signal was raised since the watch was taken.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.inner.state.lock().count > self.seen
    }

    /// Blocks for `duration` unless the signal is raised after the watch
    /// was taken.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Interrupted`] if such a raise happened.
    pub fn sleep(&self, duration: Duration) -> CoreResult<()> {
        let seen = self.seen;
        self.interrupt.sleep_until(duration, |state| state.count > seen)
    }
}
