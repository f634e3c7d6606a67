//! An edge-triggered wake primitive layered over a monitor (mutex +
//! condvar), used for worker idle/wake.
//!
//! The low bit of the guarded counter records "a waiter has prepared but
//! not yet waited"; `signal` only bumps the epoch (and only broadcasts) if
//! that bit is set, so a `signal` with nobody waiting is cheap and does not
//! wake anyone unnecessarily. The critical correctness property is that a
//! `signal` sequenced between a `prepare_wait` and its matching
//! `perform_wait` is never lost: both operations take the same mutex, so
//! `perform_wait` always observes whatever epoch `signal` last published.

use std::sync::{Condvar, Mutex};

pub struct EventCount {
    state: Mutex<i32>,
    cv: Condvar,
}

impl Default for EventCount {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCount {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Record that the caller intends to wait, and return a token capturing
    /// the current epoch. Must be followed by `perform_wait(token)`, with no
    /// blocking call in between other than the caller's own re-check of its
    /// wait condition (to close the lost-wakeup window per the worker loop
    /// in §4.9).
    pub fn prepare_wait(&self) -> i32 {
        let mut guard = self.state.lock().unwrap();
        *guard |= 1;
        *guard
    }

    /// Block until a `signal` has been observed whose epoch differs from
    /// the one captured in `token`. Returns immediately if that has already
    /// happened by the time this is called.
    pub fn perform_wait(&self, token: i32) {
        let epoch = token & !1;
        let mut guard = self.state.lock().unwrap();
        while (*guard & !1) == epoch {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    /// Advance the epoch and wake all waiters, but only if at least one
    /// `prepare_wait` is outstanding.
    pub fn signal(&self) {
        let mut guard = self.state.lock().unwrap();
        if *guard & 1 != 0 {
            *guard = guard.wrapping_add(2) & !1;
            drop(guard);
            self.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_before_wait_does_not_block() {
        let ec = EventCount::new();
        let token = ec.prepare_wait();
        ec.signal();
        // Must return immediately; if it hung this test would time out.
        ec.perform_wait(token);
    }

    #[test]
    fn signal_wakes_a_blocked_waiter() {
        let ec = Arc::new(EventCount::new());
        let woke = Arc::new(AtomicBool::new(false));

        let token = ec.prepare_wait();
        let waiter = {
            let ec = Arc::clone(&ec);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                ec.perform_wait(token);
                woke.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::SeqCst));
        ec.signal();
        waiter.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn signal_with_no_waiters_is_a_no_op() {
        let ec = EventCount::new();
        ec.signal();
        ec.signal();
    }
}
