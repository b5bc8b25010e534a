// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Per-loop wakeup state and the producer wakeup protocol (spec.md §3
//! "Wakeup state", §5 "Wakeup protocol").
//!
//! The `Waker` trait here mirrors the teacher's `ThreadWaker` abstraction in
//! `resilient_reactor_thread/types.rs`: "how do I interrupt whatever this
//! thread is blocked in". [`crate::executor::SingleThreadExecutor`] blocks in
//! a [`Condvar`](std::sync::Condvar) and wakes via `notify_all`;
//! [`crate::reactor::EventLoop`] blocks in [`mio::Poll::poll`] and wakes via
//! [`mio::Waker`].

use std::sync::atomic::{AtomicU8, Ordering};

/// Interrupts whatever blocking wait the owning thread is currently inside.
///
/// Implementations must be safe to call from any thread (spec.md §5: "Foreign
/// producers fence...").
pub trait Waker: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an error if the underlying wake signal could not be sent. Per
    /// spec.md §5, a missed wakeup is not tolerated by the protocol (the
    /// CAS-swap prevents redundant calls, not dropped ones), so callers
    /// should log failures rather than silently ignore them.
    fn wake(&self) -> std::io::Result<()>;
}

const AWAKE: u8 = 0;
const IDLE: u8 = 1;
const IDLE_UNTIL: u8 = 2;

/// The shared, cross-thread-visible half of spec.md §3's "Wakeup state".
///
/// The actual deadline for `IDLE-UNTIL` is *not* stored here: it is
/// loop-thread-owned state (the loop is the only reader), so it lives
/// alongside the executor's other loop-local fields rather than behind an
/// atomic producers never need to touch.
#[derive(Debug, Default)]
pub struct WakeupState {
    tag: AtomicU8,
}

impl WakeupState {
    #[must_use]
    pub const fn new() -> Self { Self { tag: AtomicU8::new(AWAKE) } }

    /// Producer-side fence (spec.md §5): swaps the state to `AWAKE` and
    /// returns `true` iff the prior state was *not* `AWAKE` — i.e. iff this
    /// call is the one that should invoke [`Waker::wake`]. At most one
    /// concurrent producer observes `true` for a given idle period, which is
    /// what keeps wakeups O(1) amortized (spec.md §3).
    #[must_use]
    pub fn mark_awake_and_should_wake(&self) -> bool { self.tag.swap(AWAKE, Ordering::SeqCst) != AWAKE }

    /// Loop-side: arm for an indefinite blocking wait.
    pub fn arm_idle(&self) { self.tag.store(IDLE, Ordering::SeqCst); }

    /// Loop-side: arm for a blocking wait bounded by a scheduled-task
    /// deadline. The deadline value itself is tracked by the caller.
    pub fn arm_idle_until(&self) { self.tag.store(IDLE_UNTIL, Ordering::SeqCst); }

    /// Loop-side: mark awake after returning from the blocking wait. A racy,
    /// non-atomic-with-respect-to-producers lazy write is intentional (spec.md
    /// §5: "a spurious extra wakeup is harmless, a missed wakeup is not").
    pub fn mark_awake(&self) { self.tag.store(AWAKE, Ordering::Relaxed); }

    #[must_use]
    pub fn is_awake(&self) -> bool { self.tag.load(Ordering::SeqCst) == AWAKE }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_transitioning_producer_should_wake() {
        let state = WakeupState::new();
        state.arm_idle();
        assert!(state.mark_awake_and_should_wake());
        // Already AWAKE now; a second racer must not also be told to wake.
        assert!(!state.mark_awake_and_should_wake());
    }

    #[test]
    fn fresh_state_is_awake() {
        assert!(WakeupState::new().is_awake());
    }
}
