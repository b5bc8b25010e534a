// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios 2, 4, and the `register`/interest boundary cases
//! (spec.md §8).

use pretty_assertions::assert_eq;
use r3bl_reactor_core::{Attachment, EventLoop, Executor, Interest, Reactor, ReactorConfig, RegisterError};
use serial_test::serial;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod support;

/// Scenario 2: one loop, a connected socket pair standing in for a bound
/// server and a connected client; the client writes once, the server's
/// read hook observes exactly one delivery, dispatched on the loop's own
/// thread.
#[test]
#[serial]
fn a_single_client_write_delivers_exactly_once_on_the_loop_thread() {
    support::init_tracing();
    let ev_loop = EventLoop::new("e2e-server-loop", ReactorConfig::default()).unwrap();
    let (server_side, mut client_side) = mio::net::UnixStream::pair().unwrap();

    let deliveries = Arc::new(AtomicUsize::new(0));
    let on_loop_thread = Arc::new(AtomicUsize::new(0));
    let (d, t) = (Arc::clone(&deliveries), Arc::clone(&on_loop_thread));
    let loop_name = "e2e-server-loop";
    let _registration = ev_loop
        .register(
            server_side,
            Interest::READABLE,
            Attachment::ReadinessTask(Box::new(move |_ops| {
                d.fetch_add(1, Ordering::SeqCst);
                if std::thread::current().name() == Some(loop_name) {
                    t.fetch_add(1, Ordering::SeqCst);
                }
            })),
        )
        .unwrap();

    client_side.write_all(b"hello").unwrap();
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(on_loop_thread.load(Ordering::SeqCst), 1);
}

/// Scenario 4: forcing repeated poll-timeout "spurious" returns (no I/O
/// readiness, just scheduled-task deadlines ticking by) past the rebuild
/// threshold must not disturb the set of live registrations.
#[test]
#[serial]
fn notifier_rebuild_preserves_registered_count() {
    support::init_tracing();
    let config = ReactorConfig { selector_auto_rebuild_threshold: 3, ..ReactorConfig::default() };
    let ev_loop = EventLoop::new("e2e-rebuild-loop", config).unwrap();
    let (server_side, _client_side) = mio::net::UnixStream::pair().unwrap();

    let _registration =
        ev_loop.register(server_side, Interest::READABLE, Attachment::ReadinessTask(Box::new(|_| {}))).unwrap();
    assert_eq!(ev_loop.registered_count(), 1);

    // Five short-lived scheduled no-ops, each forcing a bounded poll
    // timeout with zero ready events in between — enough consecutive
    // spurious returns to cross the threshold of 3.
    for i in 1..=5u64 {
        ev_loop.schedule(Box::new(|| {}), Duration::from_millis(10 * i)).unwrap();
    }
    std::thread::sleep(Duration::from_millis(400));

    assert_eq!(ev_loop.registered_count(), 1);
}

#[test]
#[serial]
fn register_with_zero_interest_fails() {
    support::init_tracing();
    let ev_loop = EventLoop::new("e2e-empty-interest-loop", ReactorConfig::default()).unwrap();
    let (server_side, _client_side) = mio::net::UnixStream::pair().unwrap();
    let err = ev_loop.register(server_side, Interest::empty(), Attachment::ReadinessTask(Box::new(|_| {}))).unwrap_err();
    assert!(matches!(err, RegisterError::EmptyInterest));
}

#[test]
#[serial]
fn cancelling_a_registration_drops_it_from_the_count() {
    support::init_tracing();
    let ev_loop = EventLoop::new("e2e-cancel-loop", ReactorConfig::default()).unwrap();
    let (server_side, _client_side) = mio::net::UnixStream::pair().unwrap();
    let registration =
        ev_loop.register(server_side, Interest::READABLE, Attachment::ReadinessTask(Box::new(|_| {}))).unwrap();
    assert_eq!(ev_loop.registered_count(), 1);
    registration.cancel().unwrap();
    assert_eq!(ev_loop.registered_count(), 0);
}
