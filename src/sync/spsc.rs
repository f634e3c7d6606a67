//! Bounded single-producer/single-consumer FIFO ring of `u32`.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// A lock-free, wait-free SPSC ring buffer of fixed power-of-two capacity
/// `C`. Fullness and emptiness are distinguished by comparing the producer
/// and consumer positions rather than by wasting a storage slot: `enq - deq
/// == C` is full, `enq - deq == 0` is empty.
pub struct SpscRing {
    mask: u32,
    storage: Box<[UnsafeCell<u32>]>,
    enq: CachePadded<AtomicU32>,
    deq: CachePadded<AtomicU32>,
}

// Safety: `storage` is only written by the single producer at `enq & mask`
// and only read by the single consumer at `deq & mask`. The producer never
// writes a slot still live for the consumer (`enq - deq < C`), and the
// consumer never reads a slot before its `push` is ordered-before it via
// the Release store to `enq` / Acquire load of `enq`.
unsafe impl Send for SpscRing {}
unsafe impl Sync for SpscRing {}

impl SpscRing {
    /// `capacity` must be a power of two.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let storage = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            mask: capacity - 1,
            storage,
            enq: CachePadded::new(AtomicU32::new(0)),
            deq: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Producer-only. Returns `Err(x)` (`x` unmoved) if the ring is full.
    pub fn push(&self, x: u32) -> Result<(), u32> {
        let enq = self.enq.load(Ordering::Relaxed);
        let deq = self.deq.load(Ordering::Acquire);
        if enq.wrapping_sub(deq) == self.capacity() {
            return Err(x);
        }
        let idx = (enq & self.mask) as usize;
        // Safety: see struct-level comment.
        unsafe {
            *self.storage[idx].get() = x;
        }
        self.enq.store(enq.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer-only. Returns `None` if the ring is empty.
    pub fn take(&self) -> Option<u32> {
        let enq = self.enq.load(Ordering::Acquire);
        let deq = self.deq.load(Ordering::Relaxed);
        if enq.wrapping_sub(deq) == 0 {
            return None;
        }
        let idx = (deq & self.mask) as usize;
        // Safety: the Acquire load of `enq` synchronizes-with the
        // producer's Release store, making the write at this index visible.
        let value = unsafe { *self.storage[idx].get() };
        self.deq.store(deq.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.enq.load(Ordering::Acquire) == self.deq.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_in_order() {
        let ring = SpscRing::new(16);
        for i in 0..16u32 {
            ring.push(i).unwrap();
        }
        for i in 0..16u32 {
            assert_eq!(ring.take(), Some(i));
        }
        assert_eq!(ring.take(), None);
    }

    #[test]
    fn push_fails_when_full_take_fails_when_empty() {
        let ring = SpscRing::new(4);
        for i in 0..4u32 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.push(99), Err(99));
        assert_eq!(ring.take(), Some(0));
        assert!(ring.push(99).is_ok());
        for _ in 0..4 {
            ring.take().unwrap();
        }
        assert_eq!(ring.take(), None);
    }

    #[test]
    fn concurrent_producer_consumer_preserves_fifo_order() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(SpscRing::new(64));
        let n = 100_000u32;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut i = 0;
                while i < n {
                    if ring.push(i).is_ok() {
                        i += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut expected = 0;
                while expected < n {
                    if let Some(v) = ring.take() {
                        assert_eq!(v, expected);
                        expected += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
