//! Bounded work-stealing deque of `u32` (the Chase-Lev shape): owner LIFO,
//! thief FIFO, single CAS on the shared position, special-cased last
//! element.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct WorkStealingDeque {
    mask: u32,
    storage: Box<[UnsafeCell<u32>]>,
    /// The owner's private end. Only the owning thread writes it (except
    /// for the restore stores inside `take_owner`, which are still only
    /// ever performed by the owner).
    priv_pos: CachePadded<AtomicU32>,
    /// The shared end. Advanced only via CAS, by whichever thread — owner
    /// or thief — wins the race for the last remaining item.
    pub_pos: CachePadded<AtomicU32>,
}

unsafe impl Send for WorkStealingDeque {}
unsafe impl Sync for WorkStealingDeque {}

impl WorkStealingDeque {
    /// `capacity` must be a power of two.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let storage = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            mask: capacity - 1,
            storage,
            priv_pos: CachePadded::new(AtomicU32::new(0)),
            pub_pos: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Owner-only push onto the private end.
    ///
    /// # Panics
    ///
    /// Panics if the deque is already at capacity — pushing past capacity is
    /// a programmer error that must not pass silently.
    pub fn push_owner(&self, x: u32) {
        let p = self.priv_pos.load(Ordering::Relaxed);
        let pub_ = self.pub_pos.load(Ordering::Acquire);
        assert!(
            p.wrapping_sub(pub_) < self.capacity(),
            "work-stealing deque push overflowed its capacity"
        );
        let idx = (p & self.mask) as usize;
        // Safety: `p - pub_ < capacity` means this slot is not part of the
        // live range `[pub_, p)` that a thief might be reading.
        unsafe {
            *self.storage[idx].get() = x;
        }
        self.priv_pos.store(p.wrapping_add(1), Ordering::Release);
    }

    /// Owner-only LIFO pop from the private end.
    pub fn take_owner(&self) -> Option<u32> {
        let p = self.priv_pos.load(Ordering::Relaxed);
        let new_p = p.wrapping_sub(1);
        // The store-then-reload of `priv_pos` acts as the full fence that
        // orders this thread's view of `pub_pos` after the decrement is
        // visible to thieves.
        self.priv_pos.store(new_p, Ordering::SeqCst);
        let pub_ = self.pub_pos.load(Ordering::SeqCst);

        let diff = new_p.wrapping_sub(pub_) as i32;
        if diff > 0 {
            // Plenty of items remain; no thief can be racing for this one.
            let idx = (new_p & self.mask) as usize;
            let value = unsafe { *self.storage[idx].get() };
            Some(value)
        } else if diff == 0 {
            // Exactly one item left: race thieves for it with a single CAS.
            let won = self
                .pub_pos
                .compare_exchange(pub_, pub_.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            self.priv_pos.store(pub_.wrapping_add(1), Ordering::Relaxed);
            if won {
                let idx = (new_p & self.mask) as usize;
                let value = unsafe { *self.storage[idx].get() };
                Some(value)
            } else {
                None
            }
        } else {
            // Already empty; resynchronize the private end with the public
            // one so future pushes don't think stale items remain.
            self.priv_pos.store(pub_, Ordering::Relaxed);
            None
        }
    }

    /// Thief-only FIFO steal from the public end.
    pub fn steal_foreign(&self) -> Option<u32> {
        let pub_ = self.pub_pos.load(Ordering::Acquire);
        let p = self.priv_pos.load(Ordering::Acquire);
        if p.wrapping_sub(pub_) as i32 <= 0 {
            return None;
        }
        let idx = (pub_ & self.mask) as usize;
        // Safety: read optimistically; if the CAS below fails the read may
        // have raced a concurrent owner pop reusing the slot, but the
        // result is simply discarded, which is sound for a `Copy` payload.
        let value = unsafe { *self.storage[idx].get() };
        match self.pub_pos.compare_exchange(
            pub_,
            pub_.wrapping_add(1),
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => Some(value),
            Err(_) => None,
        }
    }

    /// A racy hint only: true if the deque looked empty at the time of the
    /// read. Used by the scheduling loop to decide whether to bother
    /// stealing from this peer; never relied on for correctness.
    pub fn is_empty_hint(&self) -> bool {
        let pub_ = self.pub_pos.load(Ordering::Acquire);
        let p = self.priv_pos.load(Ordering::Acquire);
        p.wrapping_sub(pub_) as i32 <= 0
    }
}
