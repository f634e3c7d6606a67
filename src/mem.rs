//! A minimal reserve/commit interface.
//!
//! The real allocators (arena, buddy, host reservation) are out of scope —
//! only the reserve/commit interface matters to the scheduler, and this
//! default implementation gives the crate something self-contained to
//! build on.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A backing region that can be reserved up front and grown ("committed")
/// lazily without moving previously committed elements.
pub trait ReserveCommit<T> {
    /// Reserve address space (or, here, allocate) for up to `capacity`
    /// elements without initializing any of them.
    fn reserve(capacity: usize) -> Self;

    /// Number of elements currently committed.
    fn committed(&self) -> usize;

    /// Grow the committed range to `new_len`, value-initializing the newly
    /// committed slots with `init`. Returns `false` if `new_len` exceeds the
    /// reserved capacity.
    fn commit_to(&self, new_len: usize, init: impl Fn(usize) -> T) -> bool;

    /// Borrow a committed element. Panics if `index >= committed()`.
    fn get(&self, index: usize) -> &T;
}

/// A `Vec`-backed reserve/commit region. Capacity is reserved at
/// construction; `commit_to` only ever grows the logical length, matching
/// the one-way grow semantics of a real reserve/commit allocator.
pub struct VecReserveCommit<T> {
    capacity: usize,
    committed: AtomicUsize,
    storage: UnsafeCell<Vec<T>>,
}

// Safety: growth is serialized by the caller (pool creation happens on a
// single thread per pool, see `TaskPool::grow`); reads only ever touch
// indices below `committed`, which is monotonically increasing and is
// itself the publication point (Acquire/Release below).
unsafe impl<T: Send> Send for VecReserveCommit<T> {}
unsafe impl<T: Send + Sync> Sync for VecReserveCommit<T> {}

impl<T> ReserveCommit<T> for VecReserveCommit<T> {
    fn reserve(capacity: usize) -> Self {
        Self {
            capacity,
            committed: AtomicUsize::new(0),
            storage: UnsafeCell::new(Vec::with_capacity(capacity)),
        }
    }

    fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    fn commit_to(&self, new_len: usize, init: impl Fn(usize) -> T) -> bool {
        if new_len > self.capacity {
            return false;
        }
        let current = self.committed.load(Ordering::Acquire);
        if new_len <= current {
            return true;
        }
        // Safety: single committer per region by construction (pool growth
        // is serialized by the pool's own lock-free free-list protocol,
        // which only ever grows on the owning thread).
        let vec = unsafe { &mut *self.storage.get() };
        for i in current..new_len {
            vec.push(init(i));
        }
        self.committed.store(new_len, Ordering::Release);
        true
    }

    fn get(&self, index: usize) -> &T {
        assert!(index < self.committed(), "index out of committed range");
        // Safety: index < committed, and committed is only ever increased,
        // so this element has been pushed and the Vec has not reallocated
        // since reservation reserved `capacity` up front.
        let vec = unsafe { &*self.storage.get() };
        &vec[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_reserve_commit_grows_without_losing_data() {
        let r: VecReserveCommit<u32> = VecReserveCommit::reserve(16);
        assert!(r.commit_to(4, |i| i as u32 * 10));
        assert_eq!(*r.get(0), 0);
        assert_eq!(*r.get(3), 30);
        assert!(r.commit_to(8, |i| i as u32 * 10));
        assert_eq!(*r.get(0), 0);
        assert_eq!(*r.get(7), 70);
    }

    #[test]
    fn vec_reserve_commit_rejects_over_capacity() {
        let r: VecReserveCommit<u32> = VecReserveCommit::reserve(4);
        assert!(!r.commit_to(5, |i| i as u32));
    }
}
