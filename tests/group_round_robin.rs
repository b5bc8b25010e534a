// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenario 1 (spec.md §8): a group of 2 loops observes 4
//! submitted tasks split 2-and-2 in round-robin order.

use pretty_assertions::assert_eq;
use r3bl_reactor_core::{Executor, EventLoopGroup, ReactorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn four_tasks_split_two_and_two_across_a_group_of_two() {
    let group = EventLoopGroup::new(2, "rr-e2e", ReactorConfig::default()).unwrap();
    let per_loop: Vec<Arc<AtomicUsize>> = group.loops().iter().map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let mut futures = Vec::new();
    for _ in 0..4 {
        let chosen = group.next();
        let index = group.loops().iter().position(|l| Arc::ptr_eq(l, chosen)).unwrap();
        let counter = Arc::clone(&per_loop[index]);
        futures.push(chosen.submit(move || counter.fetch_add(1, Ordering::SeqCst)).unwrap());
    }
    for f in futures {
        f.sync(Some(Duration::from_secs(2))).unwrap();
    }

    assert_eq!(per_loop[0].load(Ordering::SeqCst), 2);
    assert_eq!(per_loop[1].load(Ordering::SeqCst), 2);
}

#[test]
fn group_of_one_always_picks_the_sole_loop() {
    let group = EventLoopGroup::new(1, "solo-e2e", ReactorConfig::default()).unwrap();
    for _ in 0..10 {
        assert!(Arc::ptr_eq(group.next(), &group.loops()[0]));
    }
}
