// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios 5 and 6 (spec.md §8).

use pretty_assertions::assert_eq;
use r3bl_reactor_core::{Attachment, EventLoop, Executor, Interest, Reactor, ReactorConfig};
use serial_test::serial;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod support;

/// Scenario 5: with `io_ratio == 100`, a single ready I/O dispatch does not
/// starve the task queue — all 1000 already-queued tasks run in the same
/// iteration that serviced the one ready registration.
#[test]
#[serial]
fn io_ratio_100_drains_the_full_queue_behind_one_ready_dispatch() {
    support::init_tracing();
    let config = ReactorConfig { io_ratio: 100, ..ReactorConfig::default() };
    let ev_loop = EventLoop::new("e2e-io-ratio-loop", config).unwrap();
    let (server_side, mut client_side) = mio::net::UnixStream::pair().unwrap();
    let _registration =
        ev_loop.register(server_side, Interest::READABLE, Attachment::ReadinessTask(Box::new(|_| {}))).unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        let c = Arc::clone(&completed);
        ev_loop.execute(Box::new(move || { c.fetch_add(1, Ordering::SeqCst); })).unwrap();
    }
    // Trigger the one readiness dispatch alongside the queued tasks.
    client_side.write_all(b"x").unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(completed.load(Ordering::SeqCst), 1000);
}

/// Scenario 6: a foreign-thread submission while the loop is in the middle
/// of running work (not parked) must not block or require a wakeup to be
/// delivered for the task to eventually run — the CAS-swap in
/// `WakeupState::mark_awake_and_should_wake` already observed `AWAKE` and
/// skipped the `Waker::wake` call. We cannot observe the skipped call
/// directly from outside the crate, but the functional consequence — the
/// task still runs promptly without a second external nudge — is the
/// observable half of the property.
#[test]
#[serial]
fn submitting_while_the_loop_is_busy_still_completes_without_an_external_nudge() {
    support::init_tracing();
    let ev_loop = EventLoop::new("e2e-busy-wakeup-loop", ReactorConfig::default()).unwrap();
    // Keep the loop continuously busy (never parked) for a while by
    // resubmitting a cheap task from inside itself.
    let keep_busy = Arc::new(AtomicUsize::new(0));
    let kb = Arc::clone(&keep_busy);
    ev_loop.execute(Box::new(move || { kb.fetch_add(1, Ordering::SeqCst); })).unwrap();
    for _ in 0..50 {
        let kb = Arc::clone(&keep_busy);
        ev_loop.execute(Box::new(move || { kb.fetch_add(1, Ordering::SeqCst); })).unwrap();
    }

    let future = ev_loop.submit(|| 42).unwrap();
    assert_eq!(future.sync(Some(Duration::from_secs(2))).unwrap(), 42);
}
