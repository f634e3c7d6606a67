//! Permits-list records: the waiter batches chained onto a prerequisite's
//! `permits_head` and walked when that prerequisite completes.

use crate::error::{Result, SchedulerError};
use crate::mem::{ReserveCommit, VecReserveCommit};
use crate::sync::MpmcRing;
use crate::TaskId;
use std::cell::{Cell, UnsafeCell};

/// Bounded waiter-list size per record, per the data model ("typically
/// ≤ 14"); a batch larger than this is split across a short chain of
/// records rather than rejected.
pub(crate) const MAX_WAITERS: usize = 14;

pub(crate) const NONE_LINK: u32 = u32::MAX;

const LINK_POOL_BITS: u32 = 8;
const LINK_RECORD_BITS: u32 = 32 - LINK_POOL_BITS;
const LINK_RECORD_MASK: u32 = (1 << LINK_RECORD_BITS) - 1;

/// Permits chains span pools (a dependency's `permits_head` accumulates
/// records allocated by whichever pools published against it), so a link
/// value must identify both the owning pool's record array and the record
/// within it — the same problem `TaskId` solves for task slots, packed the
/// same way.
pub(crate) fn pack_link(pool_index: u32, record_index: u32) -> u32 {
    debug_assert!(record_index <= LINK_RECORD_MASK);
    (pool_index << LINK_RECORD_BITS) | record_index
}

pub(crate) fn unpack_link(link: u32) -> (u32, u32) {
    (link >> LINK_RECORD_BITS, link & LINK_RECORD_MASK)
}

/// A single permits-list record.
///
/// `link` serves two non-overlapping purposes depending on the record's
/// lifecycle state: while attached to a slot's `permits_head` chain (or
/// chained within one just-built batch) it is a packed `(pool, record)`
/// pointer to the next record, possibly in a different pool's storage
/// (written once, before the record is published via CAS, never touched
/// again); while free it is a plain same-pool index, the pool's free-list
/// "next free" pointer. Both uses are single-writer — either the
/// allocating thread before publish, or the pool's own thread while
/// draining/reusing its free list — so a plain `Cell` suffices.
pub(crate) struct PermitsRecord {
    pub(crate) pool_index: u32,
    link: Cell<u32>,
    count: Cell<u32>,
    waiters: UnsafeCell<[u32; MAX_WAITERS]>,
}

// Safety: `waiters`/`count`/`link` are written only by the allocating
// thread up until the record is published (CAS'd onto a `permits_head`),
// and read-only thereafter by whichever thread walks the chain during
// completion; the record is never freed while still reachable from a
// slot, since `free`/`return_remote` are only reached after a walker has
// already unlinked the whole chain it read.
unsafe impl Sync for PermitsRecord {}

impl PermitsRecord {
    fn empty() -> Self {
        Self {
            pool_index: 0,
            link: Cell::new(NONE_LINK),
            count: Cell::new(0),
            waiters: UnsafeCell::new([TaskId::NONE.bits(); MAX_WAITERS]),
        }
    }

    /// The packed `(pool, record)` link to the next record in the chain, or
    /// `NONE_LINK`. Only meaningful once this record has been attached to a
    /// `permits_head` (or linked within a just-built batch); call `unpack_link`
    /// on a non-sentinel result.
    pub(crate) fn link(&self) -> u32 {
        self.link.get()
    }

    pub(crate) fn waiters(&self) -> &[u32] {
        // Safety: read-only access after publish; see struct-level comment.
        let all = unsafe { &*self.waiters.get() };
        &all[..self.count.get() as usize]
    }

    pub(crate) fn set_link(&self, link: u32) {
        self.link.set(link);
    }
}

/// Per-pool storage and free-list for permits records.
///
/// Allocation and local freeing are single-threaded (only the pool's own
/// thread ever calls `allocate`/`free`/`drain_returns`), matching the
/// single-writer-region design used throughout the task pool. Records
/// owned by this pool but freed while being walked by a foreign thread
/// arrive via `return_remote`, a genuinely multi-producer path, and are
/// reclaimed lazily by `drain_returns`.
pub(crate) struct PermitsPool {
    pool_index: u32,
    chunk_size: u32,
    records: VecReserveCommit<PermitsRecord>,
    free_head: Cell<u32>,
    returns: MpmcRing,
}

// Safety: `free_head` and the free-list links threaded through `records`
// are only ever touched by this pool's own thread (`allocate_chain`,
// `free_local`, `drain_returns`); cross-thread handoff goes exclusively
// through `returns`, which is a genuinely thread-safe MPMC ring.
unsafe impl Sync for PermitsPool {}

impl PermitsPool {
    pub(crate) fn new(pool_index: u32, capacity: u32, chunk_size: u32) -> Self {
        Self {
            pool_index,
            chunk_size,
            records: VecReserveCommit::reserve(capacity as usize),
            free_head: Cell::new(NONE_LINK),
            returns: MpmcRing::new(chunk_size.next_power_of_two().max(16)),
        }
    }

    fn record(&self, idx: u32) -> &PermitsRecord {
        self.records.get(idx as usize)
    }

    fn grow(&self) -> Result<()> {
        let current = self.records.committed() as u32;
        let target = current + self.chunk_size;
        if !self.records.commit_to(target as usize, |_| PermitsRecord::empty()) {
            return Err(SchedulerError::ChunkCommitFailed);
        }
        for idx in (current..target).rev() {
            self.push_free(idx);
        }
        Ok(())
    }

    fn push_free(&self, idx: u32) {
        self.record(idx).link.set(self.free_head.get());
        self.free_head.set(idx);
    }

    fn pop_free(&self) -> Option<u32> {
        let idx = self.free_head.get();
        if idx == NONE_LINK {
            return None;
        }
        self.free_head.set(self.record(idx).link.get());
        Some(idx)
    }

    /// Drain records returned by foreign pools since the last call and
    /// return them to the local free list. Called once per scheduling-loop
    /// turn; a no-op when nothing is pending.
    pub(crate) fn drain_returns(&self) {
        while let Some(idx) = self.returns.take() {
            self.push_free(idx);
        }
    }

    /// Build a chain of records listing `waiters`, splitting across
    /// multiple records if `waiters.len() > MAX_WAITERS`. Returns the
    /// packed `(pool, record)` link to the chain's head record.
    pub(crate) fn allocate_chain(&self, waiters: &[TaskId]) -> Result<u32> {
        self.drain_returns();
        let mut head = NONE_LINK;
        for chunk in waiters.chunks(MAX_WAITERS).rev() {
            let idx = match self.pop_free_or_grow()? {
                Some(idx) => idx,
                None => unreachable!("grow always makes at least one record available"),
            };
            let record = self.record(idx);
            // Safety: this record was just popped from the free list, so
            // no other thread holds a reference to it.
            let slots = unsafe { &mut *record.waiters.get() };
            for (slot, w) in slots.iter_mut().zip(chunk.iter()) {
                *slot = w.bits();
            }
            record.count.set(chunk.len() as u32);
            record.link.set(head);
            head = pack_link(self.pool_index, idx);
        }
        Ok(head)
    }

    /// Walk to the last record in a chain built by `allocate_chain` (the one
    /// whose link is still `NONE_LINK`), returning its packed link.
    pub(crate) fn chain_tail(&self, head: u32) -> u32 {
        let mut current = head;
        loop {
            let (_, idx) = unpack_link(current);
            let link = self.record(idx).link();
            if link == NONE_LINK {
                return current;
            }
            current = link;
        }
    }

    fn pop_free_or_grow(&self) -> Result<Option<u32>> {
        if let Some(idx) = self.pop_free() {
            return Ok(Some(idx));
        }
        self.grow()?;
        Ok(self.pop_free())
    }

    /// Free a record that this pool allocated. If the caller is not this
    /// pool's own thread, use `return_remote` instead.
    pub(crate) fn free_local(&self, idx: u32) {
        self.push_free(idx);
    }

    /// Hand a record back to its owning pool from a foreign thread.
    pub(crate) fn return_remote(&self, idx: u32) {
        let mut value = idx;
        loop {
            match self.returns.push(value) {
                Ok(()) => return,
                Err(back) => {
                    value = back;
                    std::thread::yield_now();
                }
            }
        }
    }

    pub(crate) fn pool_index(&self) -> u32 {
        self.pool_index
    }

    pub(crate) fn record_for(&self, idx: u32) -> &PermitsRecord {
        self.record(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_walk_single_chunk() {
        let pool = PermitsPool::new(0, 64, 8);
        let waiters = vec![TaskId::new(0, 1, 0), TaskId::new(0, 2, 0)];
        let head = pool.allocate_chain(&waiters).unwrap();
        let (pool_idx, rec_idx) = unpack_link(head);
        assert_eq!(pool_idx, 0);
        let record = pool.record_for(rec_idx);
        assert_eq!(record.waiters().len(), 2);
        assert_eq!(record.link(), NONE_LINK);
    }

    #[test]
    fn allocate_splits_oversized_batch_into_a_chain() {
        let pool = PermitsPool::new(0, 64, 8);
        let waiters: Vec<TaskId> = (0..20).map(|i| TaskId::new(0, i, 0)).collect();
        let head = pool.allocate_chain(&waiters).unwrap();
        let (_, head_idx) = unpack_link(head);
        let first = pool.record_for(head_idx);
        assert_eq!(first.waiters().len(), MAX_WAITERS);
        let (_, second_idx) = unpack_link(first.link());
        let second = pool.record_for(second_idx);
        assert_eq!(second.waiters().len(), 20 - MAX_WAITERS);
        assert_eq!(second.link(), NONE_LINK);
        assert_eq!(pool.chain_tail(head), pack_link(0, second_idx));
    }

    #[test]
    fn freed_records_are_reused() {
        let pool = PermitsPool::new(0, 16, 4);
        let head = pool.allocate_chain(&[TaskId::new(0, 1, 0)]).unwrap();
        let (_, idx) = unpack_link(head);
        pool.free_local(idx);
        let head2 = pool.allocate_chain(&[TaskId::new(0, 2, 0)]).unwrap();
        assert_eq!(head, head2);
    }

    #[test]
    fn remote_return_is_reclaimed_by_drain() {
        let pool = PermitsPool::new(0, 16, 4);
        let head = pool.allocate_chain(&[TaskId::new(0, 1, 0)]).unwrap();
        let (_, idx) = unpack_link(head);
        pool.return_remote(idx);
        assert_eq!(pool.pop_free(), None);
        pool.drain_returns();
        assert_eq!(pool.pop_free(), Some(idx));
    }
}
