//! A task pool: one owning thread's slab of task slots, ready deque, and
//! permits-list arena.

use crate::config::{Role, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::mem::{ReserveCommit, VecReserveCommit};
use crate::scheduler::{current_pool_is, Scheduler};
use crate::sync::{MpmcRing, WorkStealingDeque};
use crate::task::permits::{self, PermitsPool};
use crate::task::slot::{CompletionType, TaskContext, TaskSlot, NONE_LINK};
use crate::TaskId;
use std::cell::Cell;
use std::sync::atomic::Ordering;

/// A handle to a reserved-but-unpublished (or already-published) task,
/// returned by `pool_task_get_data`. Used to fill in the task's body,
/// completion callback, and completion type before publishing it.
pub struct TaskHandle<'a> {
    slot: &'a TaskSlot,
}

impl<'a> TaskHandle<'a> {
    pub fn set_main<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.slot.set_main(f)
    }

    pub fn set_on_complete<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.slot.set_on_complete(f)
    }

    pub fn set_completion_type(&self, completion_type: CompletionType) {
        self.slot.completion_type.set(completion_type);
    }
}

pub(crate) struct TaskPool {
    pub(crate) role: Role,
    pub(crate) index: u32,
    capacity: u32,
    slots: VecReserveCommit<TaskSlot>,
    /// Head of the free-slot list. Single-writer: only this pool's own
    /// thread ever calls `create`/`free_slot`, matching the per-pool
    /// ownership model — the chain itself is threaded through each free
    /// slot's otherwise-idle `parent_id` field.
    free_head: Cell<u32>,
    /// Slot indices freed by a thread other than this pool's owner —
    /// possible whenever a stolen task completes on the worker that stole
    /// it, or completion recurses into a parent owned by a different pool.
    /// Drained into the local free list by the owning thread's scheduling
    /// loop, mirroring `PermitsPool::returns`.
    slot_returns: MpmcRing,
    pub(crate) ready: WorkStealingDeque,
    pub(crate) permits: PermitsPool,
}

// Safety: `free_head` is mutated only by this pool's owning thread (see
// field comment); every other field is independently `Sync`.
unsafe impl Sync for TaskPool {}

impl TaskPool {
    pub(crate) fn new(role: Role, index: u32, config: &SchedulerConfig) -> Result<Self> {
        let capacity = config.pool_capacity;
        let slots = VecReserveCommit::reserve(capacity as usize);
        if !slots.commit_to(capacity as usize, |_| TaskSlot::new()) {
            return Err(SchedulerError::ReserveFailed { pool: index });
        }
        let pool = Self {
            role,
            index,
            capacity,
            slots,
            free_head: Cell::new(NONE_LINK),
            slot_returns: MpmcRing::new(capacity.next_power_of_two().max(16)),
            ready: WorkStealingDeque::new(config.ready_queue_capacity),
            permits: PermitsPool::new(index, capacity.saturating_mul(4), config.permits_chunk_size),
        };
        for idx in (0..capacity).rev() {
            pool.push_free_slot(idx);
        }
        Ok(pool)
    }

    pub(crate) fn slot(&self, slot_index: u32) -> &TaskSlot {
        self.slots.get(slot_index as usize)
    }

    fn push_free_slot(&self, idx: u32) {
        self.slot(idx)
            .parent_id
            .store(self.free_head.get(), Ordering::Relaxed);
        self.free_head.set(idx);
    }

    fn pop_free_slot(&self) -> Option<u32> {
        let idx = self.free_head.get();
        if idx == NONE_LINK {
            return None;
        }
        let next = self.slot(idx).parent_id.load(Ordering::Relaxed);
        self.free_head.set(next);
        Some(idx)
    }

    /// Look up a slot by id, validating it is live and belongs to this pool.
    pub(crate) fn checked_slot(&self, id: TaskId) -> Result<&TaskSlot> {
        if id.is_none() || !id.has_valid_bit() || id.pool_index() != self.index {
            return Err(SchedulerError::StaleTaskId);
        }
        let slot = self.slot(id.slot_index());
        if slot.generation.load(Ordering::Acquire) != id.generation() {
            return Err(SchedulerError::StaleTaskId);
        }
        Ok(slot)
    }

    pub(crate) fn task_get_data(&self, id: TaskId) -> Result<TaskHandle<'_>> {
        Ok(TaskHandle {
            slot: self.checked_slot(id)?,
        })
    }

    /// Reserve `ids.len()` slots, stamping each with `parent_id`. If
    /// `parent_id` is not `TaskId::NONE`, the parent's `work_count` gains one
    /// per child reserved, so the parent cannot complete before its children
    /// do. Reserves nothing on failure.
    pub(crate) fn task_create(
        &self,
        scheduler: &'static Scheduler,
        ids: &mut [TaskId],
        parent_id: TaskId,
    ) -> Result<()> {
        self.drain_slot_returns();
        for i in 0..ids.len() {
            match self.pop_free_slot() {
                Some(slot_idx) => {
                    let slot = self.slot(slot_idx);
                    slot.reset_for_reserve(parent_id);
                    let generation = slot.generation.load(Ordering::Relaxed);
                    ids[i] = TaskId::new(self.index, slot_idx, generation);
                    if !parent_id.is_none() {
                        scheduler.slot(parent_id).work_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    for id in ids.iter().take(i) {
                        self.push_free_slot(id.slot_index());
                        if !parent_id.is_none() {
                            scheduler
                                .slot(parent_id)
                                .work_count
                                .fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                    return Err(SchedulerError::PoolExhausted {
                        pool: self.index,
                        capacity: self.capacity,
                    });
                }
            }
        }
        Ok(())
    }

    /// Free a slot this pool owns, bumping its generation. `complete` can
    /// run on any thread — a stolen task completes on its thief, and parent
    /// recursion can cross into a pool the calling thread doesn't own — so
    /// a free from a foreign thread goes through `slot_returns` instead of
    /// touching the free list directly.
    fn free_slot(&self, id: TaskId) {
        let slot_index = id.slot_index();
        let slot = self.slot(slot_index);
        slot.generation.store(
            slot.generation.load(Ordering::Relaxed).wrapping_add(1),
            Ordering::Release,
        );
        if current_pool_is(self.index) {
            self.push_free_slot(slot_index);
        } else {
            let mut value = slot_index;
            loop {
                match self.slot_returns.push(value) {
                    Ok(()) => return,
                    Err(back) => {
                        value = back;
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    /// Drain slots freed by foreign threads since the last call. Called
    /// once per scheduling-loop turn by this pool's owning thread.
    pub(crate) fn drain_slot_returns(&self) {
        while let Some(idx) = self.slot_returns.take() {
            self.push_free_slot(idx);
        }
    }

    /// Publish a batch of ids sharing this pool, against a shared
    /// dependency list. See the module-level design notes in `DESIGN.md`
    /// for the `wait_count` arithmetic.
    pub(crate) fn task_publish(
        &self,
        scheduler: &'static Scheduler,
        ids: &[TaskId],
        deps: &[TaskId],
    ) -> Result<()> {
        // Reject a double-publish (or a stale/expired id) before mutating
        // anything, so a failing batch leaves every id's state untouched.
        for &id in ids {
            self.checked_slot(id)?.mark_published()?;
        }

        for &id in ids {
            self.checked_slot(id)?
                .wait_count
                .fetch_add(deps.len() as u32, Ordering::Relaxed);
        }

        for &d in deps {
            let dep_slot = scheduler.slot(d);
            let chain_head = self.permits.allocate_chain(ids)?;
            let tail = self.permits.chain_tail(chain_head);

            loop {
                let old_head = dep_slot.permits_head.load(Ordering::Acquire);
                let (_, tail_idx) = permits::unpack_link(tail);
                self.permits.record_for(tail_idx).set_link(old_head);
                if dep_slot
                    .permits_head
                    .compare_exchange_weak(
                        old_head,
                        chain_head,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break;
                }
            }

            if dep_slot.work_count.load(Ordering::Acquire) == 0 {
                // The dependency may already have completed during the
                // attach race. Whoever notices zero must still win an
                // atomic claim of the chain before walking it: `complete()`
                // on the dependency's own pool observes the same zero and
                // unconditionally swaps `permits_head` to `NONE_LINK` once
                // its (possibly long-running) completion callback returns,
                // so without a claim here both this publisher and that
                // `complete()` can walk the same chain and double-notify
                // every waiter. Claim with the identical CAS `complete()`
                // would otherwise perform (`chain_head` -> `NONE_LINK`): if
                // it succeeds, nothing else has touched `permits_head` since
                // this attach, so draining here is exclusive, and
                // `complete()`'s later unconditional swap will find
                // `NONE_LINK` already there and skip; if it fails, either
                // `complete()` already swapped first (and is responsible),
                // or a later publisher extended the chain further (and will
                // perform this same check against their own head), so
                // exactly one drain still happens either way.
                if dep_slot
                    .permits_head
                    .compare_exchange(chain_head, NONE_LINK, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    drain_chain(scheduler, chain_head);
                }
            }
        }

        for &id in ids {
            let slot = self.checked_slot(id)?;
            if slot.wait_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                scheduler.enqueue_ready(id);
            }
        }
        Ok(())
    }

    /// Completion logic shared by the automatic, internal and external
    /// paths: decrement `work_count`, and at zero run `task_complete`, walk
    /// permits, and recurse to the parent.
    pub(crate) fn complete(&self, scheduler: &'static Scheduler, id: TaskId) {
        let Ok(slot) = self.checked_slot(id) else {
            return;
        };
        if slot.work_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let ctx = TaskContext {
            id,
            scheduler,
            pool_index: self.index,
        };
        slot.call_on_complete(&ctx);

        let chain_head = slot.permits_head.swap(NONE_LINK, Ordering::AcqRel);
        if chain_head != NONE_LINK {
            drain_chain(scheduler, chain_head);
        }

        let parent_id = TaskId::from_bits(slot.parent_id.load(Ordering::Acquire));
        self.free_slot(id);
        if !parent_id.is_none() {
            scheduler.complete(parent_id);
        }
    }
}

/// Walk every record in a chain, notifying waiters and returning each
/// record to its allocating pool.
fn drain_chain(scheduler: &'static Scheduler, chain_head: u32) {
    let mut current = chain_head;
    while current != NONE_LINK {
        let (pool_idx, record_idx) = permits::unpack_link(current);
        let owner = scheduler.pool_inner(pool_idx);
        let record = owner.permits.record_for(record_idx);
        let next = record.link();

        for &bits in record.waiters() {
            let waiter = TaskId::from_bits(bits);
            let waiter_slot = scheduler.slot(waiter);
            if waiter_slot.wait_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                scheduler.enqueue_ready(waiter);
            }
        }

        scheduler.return_permits_record(pool_idx, record_idx);
        current = next;
    }
}
