//! Condition gate: one mutex + condition variable per device
//!
//! The caller thread locks the gate, issues a server request, then waits on
//! the gate (releasing the lock) until an event-loop callback has updated the
//! guarded state and signalled. Every wait takes an optional deadline.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Outcome of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition became false
    Signaled,
    /// The deadline passed first
    TimedOut,
}

impl WaitOutcome {
    pub fn timed_out(self) -> bool {
        self == Self::TimedOut
    }
}

/// Deadline `timeout` from now; `None` waits forever
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// Mutex-guarded state plus the condition variable used to wake waiters
#[derive(Debug, Default)]
pub struct ConditionGate<S> {
    state: Mutex<S>,
    cond: Condvar,
}

impl<S> ConditionGate<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Lock the guarded state, recovering from poisoning
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every thread waiting on the gate
    pub fn signal(&self) {
        self.cond.notify_all();
    }

    /// Wait while `condition` holds, releasing the lock in between
    ///
    /// The condition is checked before the first wait, so a result posted
    /// before the call is never missed.
    pub fn wait_while<'a, F>(
        &self,
        mut guard: MutexGuard<'a, S>,
        deadline: Option<Instant>,
        mut condition: F,
    ) -> (MutexGuard<'a, S>, WaitOutcome)
    where
        F: FnMut(&mut S) -> bool,
    {
        while condition(&mut *guard) {
            match deadline {
                None => {
                    guard = self
                        .cond
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (guard, WaitOutcome::TimedOut);
                    }
                    let (next, _) = self
                        .cond
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = next;
                }
            }
        }

        (guard, WaitOutcome::Signaled)
    }
}
