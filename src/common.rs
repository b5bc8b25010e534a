// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Small shared types used across the reactor core.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing counter used to break ties in the scheduled-task
/// min-heap (spec.md §3 "Scheduled task": "ties broken by insertion sequence").
///
/// A plain [`AtomicU64`] is used rather than re-reading the heap's length
/// because the sequence must be assigned once, atomically, at insertion time —
/// re-deriving it from heap state would race with concurrent inserts.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    #[must_use]
    pub const fn new() -> Self { Self(AtomicU64::new(0)) }

    /// Returns the next sequence number, starting at `0`.
    pub fn next(&self) -> u64 { self.0.fetch_add(1, Ordering::Relaxed) }
}

/// Whether a loop of work should continue or stop.
///
/// Self-documenting alternative to `bool` for the per-iteration dispatch
/// helpers in [`crate::reactor`] and [`crate::executor`] — pattern matching
/// catches all cases, and the variant names read like documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep running the loop.
    Continue,
    /// Exit the loop.
    Stop,
}

impl Continuation {
    #[must_use]
    pub const fn should_stop(self) -> bool { matches!(self, Self::Stop) }
}
