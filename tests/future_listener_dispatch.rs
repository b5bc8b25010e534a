// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenario 3 (spec.md §8): a listener added after the promise
//! it's attached to has already completed still runs on the promise's
//! associated executor, never inline on a foreign caller thread.

use pretty_assertions::assert_eq;
use r3bl_reactor_core::{Executor, ReactorConfig, SingleThreadExecutor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn late_listener_runs_on_the_executor_thread_not_the_caller() {
    let exec = SingleThreadExecutor::new("e2e-listener-exec", &ReactorConfig::default());
    let future = exec.submit(|| 7).unwrap();
    // Block until done so the listener we add below is strictly "added
    // after completion".
    assert_eq!(future.sync(Some(Duration::from_secs(2))).unwrap(), 7);

    let ran_inline_on_caller = Arc::new(AtomicBool::new(false));
    let ran_off_caller = Arc::new(AtomicBool::new(false));
    let caller_thread = std::thread::current().id();
    let (a, b) = (Arc::clone(&ran_inline_on_caller), Arc::clone(&ran_off_caller));
    future.add_listener(move |_f| {
        if std::thread::current().id() == caller_thread {
            a.store(true, Ordering::SeqCst);
        } else {
            b.store(true, Ordering::SeqCst);
        }
    });

    // The listener dispatch for a foreign caller is always enqueued, never
    // inline — give the executor's own thread a moment to drain it.
    std::thread::sleep(Duration::from_millis(200));
    assert!(!ran_inline_on_caller.load(Ordering::SeqCst));
    assert!(ran_off_caller.load(Ordering::SeqCst));
}

#[test]
fn adding_then_removing_a_listener_leaves_the_future_unchanged() {
    let exec = SingleThreadExecutor::new("e2e-listener-removal-exec", &ReactorConfig::default());
    let future = exec
        .submit(|| {
            std::thread::sleep(Duration::from_millis(150));
            1
        })
        .unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&fired);
    let id = future.add_listener(move |_| f.store(true, Ordering::SeqCst));
    future.remove_listener(id);
    future.sync(Some(Duration::from_secs(2))).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(!fired.load(Ordering::SeqCst));
}
