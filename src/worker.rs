//! The per-worker scheduling loop: local deque, peer stealing, the global
//! overflow queue, and event-count-gated idle.

use crate::scheduler::Scheduler;
use crate::task::TaskContext;
use crate::TaskId;

/// Run the scheduling loop for the pool at `pool_index` until shutdown is
/// observed. Returns `0` — there is currently no failure path once the
/// loop has started, but the signature mirrors `scheduler_delete`'s
/// "first non-zero exit code" contract for when one is added.
pub(crate) fn run(scheduler: &'static Scheduler, pool_index: u32) -> i32 {
    let pool = scheduler.pool_inner(pool_index);
    let peer_count = scheduler.pool_count();
    let start_hint = (pool_index as usize).wrapping_mul(2654435761);

    loop {
        if scheduler.should_shutdown() {
            return 0;
        }

        if let Some(bits) = pool.ready.take_owner() {
            execute(scheduler, pool_index, bits);
            continue;
        }

        if let Some(bits) = steal_from_a_peer(scheduler, pool_index, peer_count, start_hint) {
            execute(scheduler, pool_index, bits);
            continue;
        }

        pool.permits.drain_returns();
        pool.drain_slot_returns();
        if let Some(bits) = scheduler.overflow_take() {
            execute(scheduler, pool_index, bits);
            continue;
        }

        let token = scheduler.eventcount().prepare_wait();
        // Re-scan once, closing the window between the checks above and
        // arming the wait, before committing to sleep.
        if pool.ready.take_owner().is_some()
            || steal_from_a_peer(scheduler, pool_index, peer_count, start_hint).is_some()
            || scheduler.overflow_take().is_some()
        {
            continue;
        }
        if scheduler.should_shutdown() {
            return 0;
        }
        scheduler.eventcount().perform_wait(token);
    }
}

/// A single non-blocking scheduling turn: local deque, then a round-robin
/// peer steal, then the global overflow. Never touches the event count —
/// callers driving their own loop (a `Role::Main` pool pumped once per
/// frame) must not be put to sleep by this crate. Returns whether a task
/// ran.
pub(crate) fn run_once(scheduler: &'static Scheduler, pool_index: u32) -> bool {
    let pool = scheduler.pool_inner(pool_index);
    let peer_count = scheduler.pool_count();
    let start_hint = (pool_index as usize).wrapping_mul(2654435761);

    if let Some(bits) = pool.ready.take_owner() {
        execute(scheduler, pool_index, bits);
        return true;
    }
    if let Some(bits) = steal_from_a_peer(scheduler, pool_index, peer_count, start_hint) {
        execute(scheduler, pool_index, bits);
        return true;
    }
    pool.permits.drain_returns();
    pool.drain_slot_returns();
    if let Some(bits) = scheduler.overflow_take() {
        execute(scheduler, pool_index, bits);
        return true;
    }
    false
}

fn steal_from_a_peer(
    scheduler: &'static Scheduler,
    pool_index: u32,
    peer_count: usize,
    start_hint: usize,
) -> Option<u32> {
    for offset in 0..peer_count {
        let peer = (start_hint.wrapping_add(offset)) % peer_count;
        if peer as u32 == pool_index {
            continue;
        }
        let peer_pool = scheduler.pool_inner(peer as u32);
        if peer_pool.ready.is_empty_hint() {
            continue;
        }
        if let Some(bits) = peer_pool.ready.steal_foreign() {
            return Some(bits);
        }
    }
    None
}

/// `pool_index` is the *executing* worker's own pool — distinct from
/// `id`'s owning pool, when `id` was stolen or came off the global
/// overflow. The task's slot always lives in its owning pool; the context
/// handed to its body carries the executing pool instead, so that any
/// children it reserves land in a pool this thread actually owns.
fn execute(scheduler: &'static Scheduler, pool_index: u32, bits: u32) {
    let id = TaskId::from_bits(bits);
    let owning_pool = scheduler.pool_inner(id.pool_index());
    let Ok(slot) = owning_pool.checked_slot(id) else {
        // The id was stale by the time we got to it (should not happen —
        // generations only roll on free, and an id is only ever enqueued
        // once between reserve and free); drop it rather than panic.
        return;
    };

    let ctx = TaskContext {
        id,
        scheduler,
        pool_index,
    };
    slot.call_main(&ctx);

    if slot.completion_type.get() == crate::task::CompletionType::Automatic {
        owning_pool.complete(scheduler, id);
    }
}
