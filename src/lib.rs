// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Event-loop group and reactor core.
//!
//! This crate is the bottom layer of an asynchronous network I/O framework: a
//! fleet of single-threaded [reactor](reactor) loops, each permanently bound to
//! a small number of OS threads, plus the [future](future)/promise machinery
//! used to compose every asynchronous operation on top of them (bind, connect,
//! close, task submission, shutdown).
//!
//! # Module Map
//!
//! - [`future`] — [`Future`](future::Future)/[`Promise`](future::Promise): the
//!   single-assignment completion primitive with listener chains.
//! - [`queue`] — the lock-free MPSC task queue each loop drains.
//! - [`executor`] — the single-threaded executor: lifecycle, task draining,
//!   scheduled-task heap.
//! - [`reactor`] — [`EventLoop`](reactor::EventLoop): the reactor
//!   specialization that adds the OS readiness notifier, interest-set
//!   registration, I/O/task time budgeting, and notifier rebuild-on-spin.
//! - [`group`] — [`EventLoopGroup`](group::EventLoopGroup): a fixed fleet of
//!   loops behind a round-robin chooser.
//! - [`config`] — process-wide knobs, read once at startup.
//! - [`error`] — the error taxonomy raised across the embedding surface.
//!
//! # Non-goals
//!
//! No work-stealing between loops (a channel is pinned to its loop for life),
//! no fair scheduling across channels within a loop (readiness order, not
//! registration order), no cross-process coordination.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

pub mod common;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod group;
pub mod queue;
pub mod reactor;

pub use config::ReactorConfig;
pub use error::{AwaitError, EventLoopError, GroupBuildError, RegisterError, SubmitError};
pub use executor::{Executor, ExecutorState, SingleThreadExecutor};
pub use future::{Future, Promise};
pub use group::{Chooser, EventLoopGroup, RoundRobinChooser};
pub use reactor::{Attachment, ChannelOps, EventLoop, Interest, Reactor, Registration, Resource, Token};
