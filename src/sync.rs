//! Bounded-wait mutex for the registry lists.
//!
//! Registry mutations must never block forever: a lock that is held longer
//! than its deadline indicates a bug on a single-core cooperative target, so
//! it is reported as a warning instead of turning into a silent hang.
//!
//! [`TimedMutex::lock_timeout`] makes one deadline-bounded attempt.
//! [`TimedMutex::lock_patiently`] repeats that attempt, logging a warning
//! each time the deadline passes, and is what list appends use: a
//! registration may be delayed but is never dropped.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use log::warn;

/// Poll interval while waiting for a contended lock.
const LOCK_POLL: Duration = Duration::from_millis(1);

/// A `std::sync::Mutex` with deadline-bounded acquisition.
#[derive(Debug, Default)]
pub struct TimedMutex<T> {
    inner: Mutex<T>,
    label: &'static str,
}

impl<T> TimedMutex<T> {
    pub fn new(label: &'static str, value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            label,
        }
    }

    /// Try to acquire the lock until `timeout` elapses.
    ///
    /// A zero timeout makes exactly one attempt.  A poisoned lock is
    /// recovered: the protected lists are only ever appended to, so a
    /// panicking holder cannot leave them half-written.
    pub fn lock_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::sleep(LOCK_POLL);
                }
            }
        }
    }

    /// Acquire the lock, re-waiting with a warning every `timeout`.
    pub fn lock_patiently(&self, timeout: Duration) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.lock_timeout(timeout) {
                return guard;
            }
            warn!("{} mutex is held too long", self.label);
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
