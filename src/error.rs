// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error taxonomy raised across the embedding surface (spec.md §7).
//!
//! Each variant carries a stable [`miette::Diagnostic`] `code` and, where the
//! failure is actionable, a `help` string — the same shape the teacher uses
//! for [`SubscribeError`] in `resilient_reactor_thread/rrt.rs`.

use std::io;

/// Errors from [`crate::reactor::EventLoop::register`].
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RegisterError {
    /// `interest_ops == 0` (spec.md §7 "Invalid-argument").
    #[error("registration interest set must be non-empty")]
    #[diagnostic(
        code(reactor_core::register::empty_interest),
        help("pass at least one of Interest::READABLE, WRITABLE, or the connect bit")
    )]
    EmptyInterest,

    /// Requested interest is not a subset of what the resource supports.
    #[error("interest {requested:?} is not a subset of the resource's valid ops {valid:?}")]
    #[diagnostic(code(reactor_core::register::invalid_interest))]
    InvalidInterest {
        requested: crate::reactor::Interest,
        valid: crate::reactor::Interest,
    },

    /// The loop has already shut down (spec.md §7 "Illegal-state").
    #[error("event loop is shutting down or shut down; registration refused")]
    #[diagnostic(code(reactor_core::register::shutdown))]
    Shutdown,

    /// The underlying OS call to register the resource failed.
    #[error("OS registration failed")]
    #[diagnostic(code(reactor_core::register::io))]
    Io(#[source] io::Error),

    /// `register` was funnelled through `submit` (called off-loop) and the
    /// submission itself could not be delivered.
    #[error("failed to funnel registration onto the owning loop")]
    #[diagnostic(code(reactor_core::register::submit_failed))]
    SubmitFailed,
}

/// Errors from [`crate::executor::Executor::execute`]/`submit`/`schedule`.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SubmitError {
    /// The executor has shut down and refuses new work.
    #[error("executor is shutting down or shut down; task refused")]
    #[diagnostic(code(reactor_core::submit::shutdown))]
    Shutdown,

    /// The bounded task queue is at capacity (`offer` returned `false`).
    #[error("task queue is full (capacity {capacity})")]
    #[diagnostic(
        code(reactor_core::submit::queue_full),
        help("increase default_max_pending_tasks, or apply backpressure upstream")
    )]
    QueueFull { capacity: usize },
}

/// Errors from [`crate::future::Future::await_result`] / `sync`.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AwaitError {
    /// The timeout elapsed before the future completed.
    #[error("timed out waiting for future to complete")]
    #[diagnostic(code(reactor_core::await::timed_out))]
    TimedOut,

    /// Called from the owning executor's own thread while the future was not
    /// yet done — this would deadlock the loop waiting on work only it can
    /// complete (spec.md §4.1 "Failure modes").
    #[error("await called from the owning executor's own thread on an incomplete future")]
    #[diagnostic(
        code(reactor_core::await::self_deadlock),
        help("use add_listener instead of blocking when already on the loop thread")
    )]
    WouldDeadlock,

    /// The future completed with a failure or cancellation cause; `sync()`
    /// rethrows it.
    #[error(transparent)]
    #[diagnostic(code(reactor_core::await::failed))]
    Failed(#[from] miette::Report),
}

/// Errors from [`crate::group::EventLoopGroup::new`].
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum GroupBuildError {
    /// `thread_count == 0`.
    #[error("event loop group thread count must be >= 1, got {0}")]
    #[diagnostic(code(reactor_core::group::zero_threads))]
    ZeroThreads(usize),

    /// `io_ratio` outside `1..=100`.
    #[error("io_ratio must be in 1..=100, got {0}")]
    #[diagnostic(code(reactor_core::group::invalid_io_ratio))]
    InvalidIoRatio(u8),

    /// A loop failed to construct; all previously constructed loops in this
    /// group are shut down and awaited before this error propagates (spec.md
    /// §4.3 construction invariant).
    #[error("failed to construct event loop {index}")]
    #[diagnostic(code(reactor_core::group::loop_construction))]
    LoopConstruction {
        index: usize,
        #[source]
        source: EventLoopError,
    },
}

/// Errors raised from inside a running loop body (spec.md §7 "I/O", "Event-loop").
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum EventLoopError {
    /// Opening the readiness notifier failed.
    #[error("failed to open readiness notifier")]
    #[diagnostic(code(reactor_core::event_loop::notifier_open))]
    NotifierOpen(#[source] io::Error),

    /// A notifier operation (poll/register/rebuild) threw.
    #[error("readiness notifier operation failed")]
    #[diagnostic(code(reactor_core::event_loop::notifier_io))]
    NotifierIo(#[source] io::Error),

    /// Spawning the dedicated OS thread failed.
    #[error("failed to spawn event loop thread")]
    #[diagnostic(code(reactor_core::event_loop::thread_spawn))]
    ThreadSpawn(#[source] io::Error),
}
