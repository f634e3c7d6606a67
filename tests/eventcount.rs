//! Event-count contract: a `signal` sequenced between `prepare_wait` and
//! `perform_wait` is never lost.

use forkjoin::sync::EventCount;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn signal_between_prepare_and_perform_is_not_lost() {
    let ec = Arc::new(EventCount::new());
    let woke = Arc::new(AtomicBool::new(false));

    let token = ec.prepare_wait();
    let signaller = {
        let ec = Arc::clone(&ec);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ec.signal();
        })
    };

    ec.perform_wait(token);
    woke.store(true, Ordering::SeqCst);
    signaller.join().unwrap();
    assert!(woke.load(Ordering::SeqCst));
}

#[test]
fn signal_with_no_prepared_waiter_does_not_block_a_later_prepare() {
    let ec = EventCount::new();
    ec.signal();
    let token = ec.prepare_wait();
    ec.signal();
    ec.perform_wait(token);
}
