//! The scheduler: the process-lifetime registry of task pools, the global
//! overflow queue, and the thread-pool lifecycle (bring-up, launch, drain,
//! teardown).

use crate::config::{Role, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::sync::{EventCount, MpmcRing};
use crate::task::pool::{TaskHandle, TaskPool};
use crate::task::slot::TaskSlot;
use crate::TaskId;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

thread_local! {
    /// The pool index this OS thread owns, if any. Set once, at worker
    /// bootstrap, by `Scheduler::create`'s spawn closures, and by
    /// `Scheduler::acquire_pool` for the calling thread. Read by
    /// `enqueue_ready`/`return_permits_record` to pick the direct,
    /// allocation-free fast path when the calling thread already owns the
    /// target pool, falling back to a cross-thread-safe path otherwise.
    static CURRENT_POOL: Cell<Option<u32>> = const { Cell::new(None) };
}

fn bind_current_pool(index: u32) {
    CURRENT_POOL.with(|c| c.set(Some(index)));
}

pub(crate) fn current_pool_is(index: u32) -> bool {
    CURRENT_POOL.with(|c| c.get() == Some(index))
}

/// Gate held by every spawned worker thread until `Scheduler::create` has
/// finished bringing up the whole pool, so no worker starts stealing from a
/// peer whose deque might not exist yet. In practice every pool is fully
/// constructed before any thread is spawned, but the handshake is kept
/// faithful to the bring-up/launch split worker pools are expected to honor.
#[derive(Default)]
struct LaunchGate {
    launched: Mutex<bool>,
    cv: Condvar,
}

impl LaunchGate {
    fn wait(&self) {
        let mut guard = self.launched.lock().unwrap();
        while !*guard {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    fn launch(&self) {
        *self.launched.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

/// A public handle to one task pool, scoped to the role and index it was
/// acquired for. Cheap to copy; every method forwards to the scheduler it
/// came from.
#[derive(Clone, Copy)]
pub struct Pool {
    scheduler: &'static Scheduler,
    index: u32,
}

impl Pool {
    pub fn role(&self) -> Role {
        self.scheduler.pool_inner(self.index).role
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Reserve `ids.len()` task slots from this pool. See the data model for
    /// the `parent_id` bookkeeping this performs.
    pub fn task_create(&self, ids: &mut [TaskId], parent_id: TaskId) -> Result<()> {
        self.scheduler
            .pool_inner(self.index)
            .task_create(self.scheduler, ids, parent_id)
    }

    /// Look up a reserved-or-published task's handle, to fill in its body,
    /// completion callback and completion type.
    pub fn task_get_data(&self, id: TaskId) -> Result<TaskHandle<'static>> {
        self.scheduler.pool_inner(self.index).task_get_data(id)
    }

    /// Publish `ids`, making each ready once every id in `deps` has
    /// completed (immediately, if `deps` is empty).
    pub fn task_publish(&self, ids: &[TaskId], deps: &[TaskId]) -> Result<()> {
        self.scheduler
            .pool_inner(self.index)
            .task_publish(self.scheduler, ids, deps)
    }

    /// Run one turn of this pool's scheduling loop without blocking: try the
    /// local deque, then a round-robin steal from a peer, then the global
    /// overflow. Returns `true` if a task ran. Intended for `Role::Main`
    /// pools, whose owning thread is the embedder's own frame loop and must
    /// never block in the event-count wait the way a dedicated worker does.
    pub fn run_once(&self) -> bool {
        crate::worker::run_once(self.scheduler, self.index)
    }

    /// Trigger `id`'s completion from outside any task context — the
    /// `Internal`/`External` completion paths, e.g. an I/O reactor
    /// finishing a request. Must be called at most once per task, and only
    /// for tasks not using `CompletionType::Automatic`.
    pub fn task_complete(&self, id: TaskId) {
        self.scheduler.complete(id);
    }

    pub fn signal_shutdown(&self) {
        self.scheduler.signal_shutdown();
    }

    pub fn should_shutdown(&self) -> bool {
        self.scheduler.should_shutdown()
    }
}

/// The scheduler: one per process, created via [`Scheduler::create`] and
/// torn down via [`Scheduler::delete`].
pub struct Scheduler {
    pools: Vec<TaskPool>,
    main_pools: std::ops::Range<u32>,
    cpu_pools: std::ops::Range<u32>,
    io_pools: std::ops::Range<u32>,
    overflow: MpmcRing,
    eventcount: EventCount,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<i32>>>,
}

impl Scheduler {
    /// Bring up a scheduler sized by `config`: build every pool, spawn one
    /// OS thread per `CpuWorker`/`IoWorker` pool, and block until every
    /// spawned thread has bound its thread-local pool ownership before
    /// releasing them to run. `Role::Main` pools get no dedicated thread —
    /// the caller drives them via [`Pool::run_once`].
    ///
    /// Leaks the scheduler (`Box::leak`) rather than handing back an owned
    /// value: task closures stash a `&'static Scheduler` inline, so the
    /// scheduler must outlive every task it ever runs without refcounting
    /// on the hot path. Reclaimed by [`Scheduler::delete`].
    pub fn create(config: SchedulerConfig) -> Result<&'static Scheduler> {
        config.validate()?;

        let mut pools = Vec::with_capacity(config.total_pools());
        let mut next_index = 0u32;
        let main_start = next_index;
        for _ in 0..config.main_pools {
            pools.push(TaskPool::new(Role::Main, next_index, &config)?);
            next_index += 1;
        }
        let main_pools = main_start..next_index;

        let cpu_start = next_index;
        for _ in 0..config.cpu_workers {
            pools.push(TaskPool::new(Role::CpuWorker, next_index, &config)?);
            next_index += 1;
        }
        let cpu_pools = cpu_start..next_index;

        let io_start = next_index;
        for _ in 0..config.io_workers {
            pools.push(TaskPool::new(Role::IoWorker, next_index, &config)?);
            next_index += 1;
        }
        let io_pools = io_start..next_index;

        let scheduler: &'static Scheduler = Box::leak(Box::new(Scheduler {
            pools,
            main_pools,
            cpu_pools,
            io_pools,
            overflow: MpmcRing::new(config.ready_queue_capacity),
            eventcount: EventCount::new(),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }));

        let gate = Arc::new(LaunchGate::default());
        let mut handles = Vec::new();
        for index in scheduler.cpu_pools.clone().chain(scheduler.io_pools.clone()) {
            let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(0);
            let worker_gate = Arc::clone(&gate);
            let role = scheduler.pools[index as usize].role;
            let spawned = std::thread::Builder::new()
                .name(format!("forkjoin-{role:?}-{index}"))
                .spawn(move || {
                    bind_current_pool(index);
                    let _ = ready_tx.send(Ok(()));
                    worker_gate.wait();
                    crate::worker::run(scheduler, index)
                });
            match spawned {
                Ok(handle) => {
                    // Serialize bring-up: don't spawn the next worker until
                    // this one has bound its thread-local and reported in.
                    if ready_rx.recv().is_err() {
                        warn!(pool = index, "worker thread vanished before reporting ready");
                    }
                    handles.push(handle);
                }
                Err(source) => {
                    gate.launch();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    // Safety: nothing has observed `scheduler` outside this
                    // function yet (no thread has run past `gate.wait()`
                    // except the ones just joined above), so reclaiming it
                    // here is sound.
                    unsafe {
                        drop(Box::from_raw(scheduler as *const Scheduler as *mut Scheduler));
                    }
                    return Err(SchedulerError::ThreadSpawnFailed(source));
                }
            }
        }

        *scheduler.workers.lock().unwrap() = handles;
        gate.launch();
        info!(
            pools = scheduler.pools.len(),
            cpu_workers = config.cpu_workers,
            io_workers = config.io_workers,
            "scheduler launched"
        );
        Ok(scheduler)
    }

    /// Signal shutdown, join every worker thread, and reclaim the scheduler.
    /// Returns the first non-zero worker exit code observed, or `0`.
    ///
    /// # Safety
    ///
    /// `scheduler` must not be used again after this call, by this thread or
    /// any other — every `&'static Scheduler` handed out (via task contexts,
    /// `Pool`s, etc.) becomes dangling.
    pub fn delete(scheduler: &'static Scheduler) -> i32 {
        scheduler.signal_shutdown();
        let handles = std::mem::take(&mut *scheduler.workers.lock().unwrap());
        let mut exit_code = 0;
        for handle in handles {
            match handle.join() {
                Ok(code) if exit_code == 0 => exit_code = code,
                Ok(_) => {}
                Err(_) => {
                    if exit_code == 0 {
                        exit_code = -1;
                    }
                }
            }
        }
        debug!(exit_code, "scheduler workers joined");
        // Safety: every worker thread has exited (joined above), and the
        // caller has agreed to treat `scheduler` as consumed, so no
        // outstanding reference can dereference it after this point.
        unsafe {
            drop(Box::from_raw(scheduler as *const Scheduler as *mut Scheduler));
        }
        exit_code
    }

    /// Acquire the `index`-th pool of the given role. For `Role::Main`,
    /// binds the calling thread as that pool's owner (enabling the
    /// same-thread fast path for `enqueue_ready`); for worker roles the
    /// owning thread was already bound at spawn time, so this is a plain
    /// lookup.
    pub fn acquire_pool(&'static self, role: Role, index: usize) -> Result<Pool> {
        let range = match role {
            Role::Main => &self.main_pools,
            Role::CpuWorker => &self.cpu_pools,
            Role::IoWorker => &self.io_pools,
        };
        let pool_index = range.start + index as u32;
        if pool_index >= range.end {
            return Err(SchedulerError::NoSuchPool(role, index));
        }
        if role == Role::Main {
            bind_current_pool(pool_index);
        }
        Ok(self.pool_by_index(pool_index))
    }

    pub fn pool_by_index(&'static self, index: u32) -> Pool {
        Pool {
            scheduler: self,
            index,
        }
    }

    pub(crate) fn pool_inner(&'static self, index: u32) -> &'static TaskPool {
        &self.pools[index as usize]
    }

    pub(crate) fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub(crate) fn slot(&'static self, id: TaskId) -> &'static TaskSlot {
        self.pool_inner(id.pool_index()).slot(id.slot_index())
    }

    /// Push a task's id onto its owning pool's ready queue if the calling
    /// thread owns that pool, or the global overflow otherwise. Signals the
    /// event count either way, in case a worker is idling.
    pub(crate) fn enqueue_ready(&'static self, id: TaskId) {
        let pool_index = id.pool_index();
        if current_pool_is(pool_index) {
            self.pool_inner(pool_index).ready.push_owner(id.bits());
        } else {
            let mut bits = id.bits();
            while let Err(back) = self.overflow.push(bits) {
                bits = back;
                std::thread::yield_now();
            }
        }
        self.eventcount.signal();
    }

    pub(crate) fn overflow_take(&self) -> Option<u32> {
        self.overflow.take()
    }

    pub(crate) fn eventcount(&self) -> &EventCount {
        &self.eventcount
    }

    /// Return a permits record to its allocating pool, via the direct
    /// free-list path if the calling thread owns that pool, or the
    /// cross-thread return queue otherwise.
    pub(crate) fn return_permits_record(&'static self, pool_index: u32, record_index: u32) {
        let permits = &self.pool_inner(pool_index).permits;
        if current_pool_is(pool_index) {
            permits.free_local(record_index);
        } else {
            permits.return_remote(record_index);
        }
    }

    /// Drive `id`'s completion bookkeeping on its owning pool.
    pub(crate) fn complete(&'static self, id: TaskId) {
        self.pool_inner(id.pool_index()).complete(self, id);
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.eventcount.signal();
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
