//! Seed scenario 2: owner LIFO locally, thief FIFO from a foreign thread,
//! and no value ever observed twice across the two.

use forkjoin::sync::WorkStealingDeque;
use std::collections::HashSet;

#[test]
fn owner_lifo_then_foreign_fifo_no_duplicates() {
    let deque = WorkStealingDeque::new(16);
    for i in 0..16u32 {
        deque.push_owner(i);
    }
    let mut owner_order = Vec::new();
    while let Some(v) = deque.take_owner() {
        owner_order.push(v);
    }
    assert_eq!(owner_order, (0..16u32).rev().collect::<Vec<_>>());

    for i in 0..16u32 {
        deque.push_owner(i);
    }
    let mut foreign_order = Vec::new();
    while let Some(v) = deque.steal_foreign() {
        foreign_order.push(v);
    }
    assert_eq!(foreign_order, (0..16u32).collect::<Vec<_>>());

    let all: HashSet<u32> = owner_order.into_iter().chain(foreign_order).collect();
    assert_eq!(all.len(), 16);
}
