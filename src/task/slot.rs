//! The per-task slot: the storage backing one live task identifier.

use crate::scheduler::{Pool, Scheduler};
use crate::task::closure::InlineClosure;
use crate::TaskId;
use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicU32, Ordering};

/// How a task's completion is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionType {
    /// The scheduler calls the completion callback immediately after
    /// `task_main` returns.
    Automatic,
    /// `task_main` itself triggers completion before returning; the
    /// scheduler must not call it again.
    Internal,
    /// Some outside event (e.g. I/O completion) triggers completion at an
    /// arbitrary later time.
    External,
}

/// Context handed to a running task's body and to its completion callback.
///
/// Holds a `&'static Scheduler` rather than an owning `Arc` so that storing
/// a task's closure inline never touches the allocator; this mirrors how
/// `kasync`'s executor in the reference pack hands workers a
/// `&'static Executor<P>` rather than a reference-counted handle.
#[derive(Clone, Copy)]
pub struct TaskContext {
    pub(crate) id: TaskId,
    pub(crate) scheduler: &'static Scheduler,
    pub(crate) pool_index: u32,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn pool(&self) -> Pool {
        self.scheduler.pool_by_index(self.pool_index)
    }

    /// For `Internal`-completion tasks: trigger this task's completion.
    /// Must be called at most once, and must not be called for tasks with
    /// any other completion type.
    pub fn complete(&self) {
        self.scheduler.complete(self.id);
    }
}

pub(crate) type TaskMain = InlineClosure<TaskContext>;
pub(crate) type TaskComplete = InlineClosure<TaskContext>;

pub(crate) const NONE_LINK: u32 = u32::MAX;

/// A task slot, resident in its owning pool's slab.
///
/// `main` and `on_complete` are stored inline (not boxed) so that neither
/// `pool_task_create` nor `pool_task_publish` allocates.
pub(crate) struct TaskSlot {
    /// Outbound completion dependents: the task body itself plus one per
    /// child reserved against this task.
    pub work_count: AtomicU32,
    /// Inbound unfinished prerequisites; reaches zero exactly once, making
    /// the task ready.
    pub wait_count: AtomicU32,
    /// Index into the pool's permits arena of the first permits record
    /// chained on this (still-incomplete) slot, or `NONE_LINK`.
    pub permits_head: AtomicU32,
    /// Packed `TaskId` bits of the parent task, or `TaskId::NONE`'s bits.
    /// Doubles as the pool's free-list "next" link while the slot is free
    /// (see `TaskPool`) — the field is otherwise dead in that state.
    pub parent_id: AtomicU32,
    /// The slot's current generation. Bumped on every free.
    pub generation: AtomicU32,
    /// Completion mode, fixed before publish and read-only afterward.
    pub completion_type: Cell<CompletionType>,
    /// Set by `publish`; rejects a second `publish` of the same id with
    /// `SchedulerError::AlreadyPublished` rather than silently corrupting
    /// `wait_count`.
    published: Cell<bool>,
    main: UnsafeCell<TaskMain>,
    on_complete: UnsafeCell<TaskComplete>,
    /// Reserved; not consumed anywhere, per the data model.
    pub flags: Cell<u32>,
}

// Safety: `completion_type`/`published`/`main`/`on_complete`/`flags` are
// written only by the slot's owning thread before publish, and are read
// thereafter by
// whichever thread executes the task or walks it during completion — both
// ordered-after publish by the happens-before edges the ready-queue and
// permits-record handoffs establish. The atomics are the only fields
// mutated concurrently from multiple threads.
unsafe impl Sync for TaskSlot {}

impl TaskSlot {
    pub fn new() -> Self {
        Self {
            work_count: AtomicU32::new(0),
            wait_count: AtomicU32::new(0),
            permits_head: AtomicU32::new(NONE_LINK),
            parent_id: AtomicU32::new(TaskId::NONE.bits()),
            generation: AtomicU32::new(0),
            completion_type: Cell::new(CompletionType::Automatic),
            published: Cell::new(false),
            main: UnsafeCell::new(TaskMain::empty()),
            on_complete: UnsafeCell::new(TaskComplete::empty()),
            flags: Cell::new(0),
        }
    }

    /// Reset a freed slot back to its reserved-but-unpublished state,
    /// bumping the generation so stale ids are rejected.
    pub fn reset_for_reserve(&self, parent_id: TaskId) {
        self.generation.store(
            self.generation.load(Ordering::Relaxed).wrapping_add(1),
            Ordering::Release,
        );
        self.work_count.store(1, Ordering::Relaxed);
        // `wait_count` starts at 1: a sentinel decremented by `publish` so
        // the task cannot become ready before its dependencies are known.
        self.wait_count.store(1, Ordering::Relaxed);
        self.permits_head.store(NONE_LINK, Ordering::Relaxed);
        self.parent_id.store(parent_id.bits(), Ordering::Relaxed);
        self.completion_type.set(CompletionType::Automatic);
        self.published.set(false);
        self.flags.set(0);
        // Safety: the slot is reserved-but-unpublished, reachable only from
        // the reserving thread at this point.
        unsafe {
            (*self.main.get()).clear();
            (*self.on_complete.get()).clear();
        }
    }

    pub fn set_main<F>(&self, f: F) -> crate::error::Result<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        // Safety: called only by the reserving thread, before publish.
        unsafe { (*self.main.get()).set(f) }
    }

    pub fn set_on_complete<F>(&self, f: F) -> crate::error::Result<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        // Safety: called only by the reserving thread, before publish.
        unsafe { (*self.on_complete.get()).set(f) }
    }

    /// Claim this slot for publish, rejecting a second publish of the same
    /// id. Called once per id at the start of `TaskPool::task_publish`,
    /// before any of its other state is mutated.
    pub fn mark_published(&self) -> crate::error::Result<()> {
        if self.published.replace(true) {
            return Err(crate::error::SchedulerError::AlreadyPublished);
        }
        Ok(())
    }

    pub fn on_complete_is_set(&self) -> bool {
        // Safety: read-only query; racing with a set on the same thread
        // cannot happen, and cross-thread reads are ordered-after publish.
        unsafe { (*self.on_complete.get()).is_set() }
    }

    /// Run `task_main`. Must be called at most once, by the worker that
    /// popped this task's id off a ready queue.
    pub fn call_main(&self, ctx: &TaskContext) {
        // Safety: called exactly once per execution by the single worker
        // that dequeued this task; no other thread touches `main` until
        // the next `reset_for_reserve`, which happens only after this
        // slot is freed (i.e. after this call returns and completion runs).
        unsafe {
            (*self.main.get()).call_once(ctx);
        }
    }

    /// Run `task_complete`, if one was set. Must be called at most once.
    pub fn call_on_complete(&self, ctx: &TaskContext) {
        // Safety: see `call_main`; completion runs after `task_main`
        // returns (or, for internal completion, is the only caller of
        // this slot's state at all) and only once per slot lifetime.
        unsafe {
            if (*self.on_complete.get()).is_set() {
                (*self.on_complete.get()).call_once(ctx);
            }
        }
    }
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self::new()
    }
}
