//! Seed scenario 1: SPSC round-trip.

use forkjoin::sync::SpscRing;

#[test]
fn round_trip_then_overflow_on_both_ends() {
    let ring = SpscRing::new(16);
    for i in 0..16u32 {
        ring.push(i).unwrap();
    }
    for i in 0..16u32 {
        assert_eq!(ring.take(), Some(i));
    }
    // A 17th push onto an already-drained-then-refilled ring still succeeds;
    // the scenario's "17th push/take fails" refers to the ring at capacity.
    for i in 0..16u32 {
        ring.push(i).unwrap();
    }
    assert_eq!(ring.push(99), Err(99));
    for i in 0..16u32 {
        assert_eq!(ring.take(), Some(i));
    }
    assert_eq!(ring.take(), None);
}
