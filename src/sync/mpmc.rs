//! Bounded any-to-any FIFO of `u32`, the Vyukov cell-sequence design.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

struct Cell {
    sequence: AtomicU32,
    value: UnsafeCell<u32>,
}

/// A bounded MPMC queue. Each cell carries its own sequence number so
/// producers and consumers never need to agree on a single shared lock;
/// contention is resolved with a single CAS per `push`/`take`, and a cell is
/// never touched by two producers (or two consumers) at once because the
/// sequence check only succeeds for the thread whose position matches.
pub struct MpmcRing {
    mask: u32,
    cells: Box<[Cell]>,
    enq: CachePadded<AtomicU32>,
    deq: CachePadded<AtomicU32>,
}

unsafe impl Send for MpmcRing {}
unsafe impl Sync for MpmcRing {}

impl MpmcRing {
    /// `capacity` must be a power of two.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let cells = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicU32::new(i),
                value: UnsafeCell::new(0),
            })
            .collect();
        Self {
            mask: capacity - 1,
            cells,
            enq: CachePadded::new(AtomicU32::new(0)),
            deq: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Returns `Err(x)` (`x` unmoved) if the queue is full.
    pub fn push(&self, x: u32) -> Result<(), u32> {
        let mut pos = self.enq.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[(pos & self.mask) as usize];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - pos as i64;
            if diff == 0 {
                match self.enq.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS on `enq` from `pos` to
                        // `pos+1` grants exclusive ownership of this cell
                        // until its sequence publishes the write below.
                        unsafe {
                            *cell.value.get() = x;
                        }
                        cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(x);
            } else {
                pos = self.enq.load(Ordering::Relaxed);
            }
        }
    }

    /// Returns `None` if the queue is empty.
    pub fn take(&self) -> Option<u32> {
        let mut pos = self.deq.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[(pos & self.mask) as usize];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - (pos as i64 + 1);
            if diff == 0 {
                match self.deq.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS grants exclusive ownership
                        // of this cell's value until the sequence below
                        // republishes it for the next wrap.
                        let value = unsafe { *cell.value.get() };
                        cell.sequence
                            .store(pos.wrapping_add(self.mask).wrapping_add(1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.deq.load(Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_round_trip() {
        let q = MpmcRing::new(8);
        for i in 0..8u32 {
            q.push(i).unwrap();
        }
        assert_eq!(q.push(99), Err(99));
        for i in 0..8u32 {
            assert_eq!(q.take(), Some(i));
        }
        assert_eq!(q.take(), None);
    }

    #[test]
    fn fifo_order_from_a_single_producer() {
        let q = MpmcRing::new(16);
        for i in 0..10u32 {
            q.push(i).unwrap();
        }
        let mut out = Vec::new();
        while let Some(v) = q.take() {
            out.push(v);
        }
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn conservation_under_concurrent_producers_and_consumers() {
        const PRODUCERS: u32 = 2;
        const VALUES: u32 = 512;
        const REPEATS: u32 = 64;
        const CONSUMERS: usize = 6;

        let q = Arc::new(MpmcRing::new(1024));
        let seen: Arc<Vec<AtomicUsize>> =
            Arc::new((0..VALUES).map(|_| AtomicUsize::new(0)).collect());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for _ in 0..REPEATS {
                        for v in 0..VALUES {
                            while q.push(v).is_err() {
                                thread::yield_now();
                            }
                        }
                    }
                })
            })
            .collect();

        let total_pushed = (PRODUCERS * VALUES * REPEATS) as usize;
        let drained = Arc::new(AtomicUsize::new(0));
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = Arc::clone(&q);
                let seen = Arc::clone(&seen);
                let drained = Arc::clone(&drained);
                thread::spawn(move || loop {
                    if let Some(v) = q.take() {
                        seen[v as usize].fetch_add(1, Ordering::Relaxed);
                        if drained.fetch_add(1, Ordering::Relaxed) + 1 >= total_pushed {
                            return;
                        }
                    } else if drained.load(Ordering::Relaxed) >= total_pushed {
                        return;
                    } else {
                        thread::yield_now();
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        for count in seen.iter() {
            assert_eq!(count.load(Ordering::Relaxed), (PRODUCERS * REPEATS) as usize);
        }
    }
}
