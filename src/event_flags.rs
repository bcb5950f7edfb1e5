//! Bitmask event primitive backing `event`-kind variables.
//!
//! Producers post bits (e.g. keypad press/release), consumers wait for any
//! bit of a mask.  Semantics follow the RTOS event object:
//!
//! | Operation | Effect                                           |
//! |-----------|--------------------------------------------------|
//! | `post`    | OR bits into the current set, wake waiters        |
//! | `set`     | replace the current set, wake waiters             |
//! | `clear`   | drop bits from the current set                    |
//! | `wait`    | block until any bit of `mask` is set, or timeout  |
//!
//! Clones share the same underlying bits.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Shared {
    bits: Mutex<u32>,
    changed: Condvar,
}

/// Shared bitmask event object.
#[derive(Debug, Clone, Default)]
pub struct EventFlags {
    shared: Arc<Shared>,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// OR `bits` into the current set.
    pub fn post(&self, bits: u32) {
        let mut cur = self.lock();
        *cur |= bits;
        self.shared.changed.notify_all();
    }

    /// Replace the current set with `bits`.
    pub fn set(&self, bits: u32) {
        let mut cur = self.lock();
        *cur = bits;
        self.shared.changed.notify_all();
    }

    /// Clear `bits` from the current set.
    pub fn clear(&self, bits: u32) {
        *self.lock() &= !bits;
    }

    /// Snapshot of the current set.
    pub fn bits(&self) -> u32 {
        *self.lock()
    }

    /// Wait for any bit of `mask`.
    ///
    /// With `reset` the current set is cleared before waiting, so only
    /// events posted after the call are observed.  Returns the matching bits,
    /// or 0 if `timeout` elapsed first.  `None` waits forever.
    pub fn wait(&self, mask: u32, reset: bool, timeout: Option<Duration>) -> u32 {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut cur = self.lock();
        if reset {
            *cur = 0;
        }
        loop {
            let matched = *cur & mask;
            if matched != 0 {
                return matched;
            }
            match deadline {
                None => {
                    cur = self
                        .shared
                        .changed
                        .wait(cur)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return 0;
                    }
                    cur = self
                        .shared
                        .changed
                        .wait_timeout(cur, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Whether two handles refer to the same event object.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u32> {
        self.shared.bits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_accumulates_bits() {
        let ev = EventFlags::new();
        ev.post(0x01);
        ev.post(0x04);
        assert_eq!(ev.bits(), 0x05);
    }

    #[test]
    fn set_replaces_bits() {
        let ev = EventFlags::new();
        ev.post(0x0F);
        ev.set(0x10);
        assert_eq!(ev.bits(), 0x10);
    }

    #[test]
    fn wait_returns_matching_bits_only() {
        let ev = EventFlags::new();
        ev.post(0x03);
        assert_eq!(ev.wait(0x02, false, Some(Duration::ZERO)), 0x02);
    }

    #[test]
    fn wait_times_out_without_match() {
        let ev = EventFlags::new();
        ev.post(0x01);
        assert_eq!(ev.wait(0x80, false, Some(Duration::from_millis(10))), 0);
    }

    #[test]
    fn wait_wakes_on_post_from_other_thread() {
        let ev = EventFlags::new();
        let producer = ev.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.post(0x40);
        });
        let got = ev.wait(0x40, true, Some(Duration::from_secs(5)));
        t.join().unwrap();
        assert_eq!(got, 0x40);
    }

    #[test]
    fn clones_share_state() {
        let a = EventFlags::new();
        let b = a.clone();
        b.post(0x08);
        assert_eq!(a.bits(), 0x08);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&EventFlags::new()));
    }
}
