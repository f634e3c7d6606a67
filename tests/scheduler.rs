//! Seed scenarios 4-6: single-task completion, parent/child ordering, and
//! dependency ordering in both publish orders.

use forkjoin::{CpuInfo, Role, Scheduler, SchedulerConfig, SchedulerError, TaskId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn tiny_config() -> SchedulerConfig {
    SchedulerConfig {
        cpu_info: CpuInfo {
            numa_count: 1,
            physical_cores: 2,
            hardware_threads: 2,
            threads_per_core: 1,
            l1_cache_bytes: 32 * 1024,
            l2_cache_bytes: 256 * 1024,
            cache_line_bytes: 64,
            vendor: "test",
        },
        cpu_workers: 2,
        io_workers: 1,
        main_pools: 1,
        pool_capacity: 64,
        ready_queue_capacity: 64,
        permits_chunk_size: 8,
    }
}

/// Spin-wait for `condition` up to a generous bound, yielding between
/// checks; fails the test (via the final assert at the call site) rather
/// than hanging forever if something regresses.
fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() && Instant::now() < deadline {
        std::thread::yield_now();
    }
}

#[test]
fn single_task_runs_and_completion_callback_fires() {
    let scheduler = Scheduler::create(tiny_config()).unwrap();
    // Tasks are produced from the test thread, which owns the main-role
    // pool; the actual execution happens on a stolen-from cpu-worker
    // thread, matching how a producer thread that isn't itself a worker is
    // expected to submit work (see `child_completes_strictly_before_its_parent`
    // and the per-pool single-writer design in `DESIGN.md`).
    let pool = scheduler.acquire_pool(Role::Main, 0).unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let mut ids = [TaskId::NONE];
    pool.task_create(&mut ids, TaskId::NONE).unwrap();
    let handle = pool.task_get_data(ids[0]).unwrap();
    handle.set_main(|_ctx| {}).unwrap();
    let flag_in_callback = Arc::clone(&flag);
    handle
        .set_on_complete(move |_ctx| flag_in_callback.store(true, Ordering::SeqCst))
        .unwrap();
    pool.task_publish(&ids, &[]).unwrap();

    wait_for(|| flag.load(Ordering::SeqCst));
    assert!(flag.load(Ordering::SeqCst));

    assert_eq!(Scheduler::delete(scheduler), 0);
}

#[test]
fn child_completes_strictly_before_its_parent() {
    let scheduler = Scheduler::create(tiny_config()).unwrap();
    let main = scheduler.acquire_pool(Role::Main, 0).unwrap();

    let parent_ts: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let child_ts: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

    let mut parent_ids = [TaskId::NONE];
    main.task_create(&mut parent_ids, TaskId::NONE).unwrap();
    let parent_id = parent_ids[0];
    let parent_handle = main.task_get_data(parent_id).unwrap();

    let child_ts_for_parent = Arc::clone(&child_ts);
    parent_handle
        .set_main(move |ctx| {
            let pool = ctx.pool();
            let mut child_ids = [TaskId::NONE];
            pool.task_create(&mut child_ids, ctx.id()).unwrap();
            let child_handle = pool.task_get_data(child_ids[0]).unwrap();
            child_handle.set_main(|_| {}).unwrap();
            let child_ts = Arc::clone(&child_ts_for_parent);
            child_handle
                .set_on_complete(move |_| *child_ts.lock().unwrap() = Some(Instant::now()))
                .unwrap();
            pool.task_publish(&child_ids, &[]).unwrap();
        })
        .unwrap();
    let parent_ts_for_callback = Arc::clone(&parent_ts);
    parent_handle
        .set_on_complete(move |_| *parent_ts_for_callback.lock().unwrap() = Some(Instant::now()))
        .unwrap();

    main.task_publish(&parent_ids, &[]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while parent_ts.lock().unwrap().is_none() && Instant::now() < deadline {
        main.run_once();
        std::thread::yield_now();
    }

    let pt = parent_ts.lock().unwrap().expect("parent did not complete");
    let ct = child_ts.lock().unwrap().expect("child did not complete");
    assert!(ct < pt, "child completed at {ct:?}, parent at {pt:?}");

    assert_eq!(Scheduler::delete(scheduler), 0);
}

/// Publish `a` as a dependency of `b` and `c`, in `publish_order`, and
/// assert `a` observably completes before either.
fn assert_dependency_ordering(publish_order: DependencyPublishOrder) {
    let scheduler = Scheduler::create(tiny_config()).unwrap();
    let pool = scheduler.acquire_pool(Role::Main, 0).unwrap();

    let ts_a: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let ts_b: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let ts_c: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

    let mut ids = [TaskId::NONE; 3];
    pool.task_create(&mut ids, TaskId::NONE).unwrap();
    let [a, b, c] = ids;

    for (id, ts) in [(a, Arc::clone(&ts_a)), (b, Arc::clone(&ts_b)), (c, Arc::clone(&ts_c))] {
        let handle = pool.task_get_data(id).unwrap();
        handle.set_main(|_| {}).unwrap();
        handle
            .set_on_complete(move |_| *ts.lock().unwrap() = Some(Instant::now()))
            .unwrap();
    }

    match publish_order {
        DependencyPublishOrder::PrerequisiteFirst => {
            pool.task_publish(&[a], &[]).unwrap();
            pool.task_publish(&[b, c], &[a]).unwrap();
        }
        DependencyPublishOrder::DependentsFirst => {
            pool.task_publish(&[b, c], &[a]).unwrap();
            pool.task_publish(&[a], &[]).unwrap();
        }
    }

    wait_for(|| ts_b.lock().unwrap().is_some() && ts_c.lock().unwrap().is_some());

    let at = ts_a.lock().unwrap().expect("a did not complete");
    let bt = ts_b.lock().unwrap().expect("b did not complete");
    let ct = ts_c.lock().unwrap().expect("c did not complete");
    assert!(at < bt, "a ({at:?}) did not precede b ({bt:?})");
    assert!(at < ct, "a ({at:?}) did not precede c ({ct:?})");

    assert_eq!(Scheduler::delete(scheduler), 0);
}

enum DependencyPublishOrder {
    PrerequisiteFirst,
    DependentsFirst,
}

#[test]
fn dependency_ordering_holds_when_prerequisite_is_published_first() {
    assert_dependency_ordering(DependencyPublishOrder::PrerequisiteFirst);
}

#[test]
fn dependency_ordering_holds_when_dependents_are_published_first() {
    assert_dependency_ordering(DependencyPublishOrder::DependentsFirst);
}

#[test]
fn publishing_the_same_id_twice_is_rejected() {
    use forkjoin::CompletionType;

    let scheduler = Scheduler::create(tiny_config()).unwrap();
    let pool = scheduler.acquire_pool(Role::Main, 0).unwrap();

    // Internal completion so the task never frees its slot (and rolls its
    // generation) out from under the second `task_publish` call below.
    let mut ids = [TaskId::NONE];
    pool.task_create(&mut ids, TaskId::NONE).unwrap();
    let handle = pool.task_get_data(ids[0]).unwrap();
    handle.set_completion_type(CompletionType::Internal);
    handle.set_main(|_ctx| {}).unwrap();

    pool.task_publish(&ids, &[]).unwrap();
    let err = pool.task_publish(&ids, &[]).unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyPublished));

    pool.task_complete(ids[0]);
    assert_eq!(Scheduler::delete(scheduler), 0);
}
