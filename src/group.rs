// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Event-loop group: a fixed fleet of [`EventLoop`]s behind a chooser
//! (spec.md §4.3).

use crate::config::ReactorConfig;
use crate::error::GroupBuildError;
use crate::executor::Executor;
use crate::future::{Future, Promise};
use crate::reactor::EventLoop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Picks the next loop to hand work to out of a fixed-size fleet (spec.md
/// §4.3 "chooser (round-robin)").
pub trait Chooser: Send + Sync {
    /// Returns an index in `0..len`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `len == 0`; [`EventLoopGroup::new`]
    /// rejects zero-length fleets before a chooser is ever consulted.
    fn next(&self, len: usize) -> usize;
}

/// Round-robin over `0..len`, masking instead of taking a modulus when `len`
/// is a power of two (spec.md §4.3 "a power-of-two optimization may mask
/// instead of mod").
#[derive(Debug, Default)]
pub struct RoundRobinChooser {
    counter: AtomicUsize,
}

impl RoundRobinChooser {
    #[must_use]
    pub fn new() -> Self { Self { counter: AtomicUsize::new(0) } }
}

impl Chooser for RoundRobinChooser {
    fn next(&self, len: usize) -> usize {
        let i = self.counter.fetch_add(1, Ordering::Relaxed);
        if len.is_power_of_two() {
            i & (len - 1)
        } else {
            i % len
        }
    }
}

/// A fixed-size fleet of [`EventLoop`]s sharing a [`Chooser`] (spec.md §4.3).
pub struct EventLoopGroup {
    loops: Vec<Arc<EventLoop>>,
    chooser: Box<dyn Chooser>,
    termination: Promise<()>,
    remaining: AtomicUsize,
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup").field("loops", &self.loops.len()).finish()
    }
}

impl EventLoopGroup {
    /// Builds `thread_count` loops named `{name_prefix}-{index}`, sharing
    /// `config`, behind a [`RoundRobinChooser`].
    ///
    /// If any loop fails to construct, every loop constructed so far is shut
    /// down and awaited before the error propagates (spec.md §4.3
    /// construction invariant).
    ///
    /// # Errors
    ///
    /// [`GroupBuildError::ZeroThreads`] if `thread_count == 0`;
    /// [`GroupBuildError::InvalidIoRatio`] if `config.io_ratio` is outside
    /// `1..=100`; [`GroupBuildError::LoopConstruction`] if a loop's notifier
    /// could not be opened.
    pub fn new(thread_count: usize, name_prefix: impl Into<String>, config: ReactorConfig) -> Result<Arc<Self>, GroupBuildError> {
        Self::with_chooser(thread_count, name_prefix, config, Box::new(RoundRobinChooser::new()))
    }

    /// As [`Self::new`], with an explicit [`Chooser`] rather than the default
    /// round-robin one.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn with_chooser(
        thread_count: usize,
        name_prefix: impl Into<String>,
        config: ReactorConfig,
        chooser: Box<dyn Chooser>,
    ) -> Result<Arc<Self>, GroupBuildError> {
        if thread_count == 0 {
            return Err(GroupBuildError::ZeroThreads(thread_count));
        }
        if !(1..=100).contains(&config.io_ratio) {
            return Err(GroupBuildError::InvalidIoRatio(config.io_ratio));
        }
        let name_prefix = name_prefix.into();
        let mut loops = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            match EventLoop::new(format!("{name_prefix}-{index}"), config) {
                Ok(event_loop) => loops.push(event_loop),
                Err(source) => {
                    tracing::error!(index, "event loop construction failed; rolling back group");
                    for built in loops {
                        let _ = built.shutdown_gracefully(Duration::ZERO, Duration::from_millis(100));
                    }
                    return Err(GroupBuildError::LoopConstruction { index, source });
                }
            }
        }

        let termination: Promise<()> = Promise::new();
        let remaining = AtomicUsize::new(loops.len());
        let group = Arc::new(Self { loops, chooser, termination, remaining });

        for event_loop in &group.loops {
            let group_for_listener = Arc::clone(&group);
            event_loop.termination_future().add_listener(move |_f| {
                if group_for_listener.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    drop(group_for_listener.termination.try_success(()));
                }
            });
        }
        Ok(group)
    }

    /// Returns the next loop per the configured [`Chooser`] (spec.md §4.3
    /// "`next()` returns chooser.next()").
    #[must_use]
    pub fn next(&self) -> &Arc<EventLoop> { &self.loops[self.chooser.next(self.loops.len())] }

    /// Read-only view of every loop in the fleet (SPEC_FULL.md §11
    /// "Diagnostics accessors").
    #[must_use]
    pub fn loops(&self) -> &[Arc<EventLoop>] { &self.loops }

    #[must_use]
    pub fn len(&self) -> usize { self.loops.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.loops.is_empty() }

    /// Propagates graceful shutdown to every loop and completes when all of
    /// them have terminated (spec.md §4.3 "Shutdown semantics propagate to
    /// every child with a shared quiet-period and timeout").
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Future<()> {
        for event_loop in &self.loops {
            let _ = event_loop.shutdown_gracefully(quiet_period, timeout);
        }
        self.termination.future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_is_rejected() {
        let err = EventLoopGroup::new(0, "grp", ReactorConfig::default()).unwrap_err();
        assert!(matches!(err, GroupBuildError::ZeroThreads(0)));
    }

    #[test]
    fn invalid_io_ratio_is_rejected() {
        let config = ReactorConfig { io_ratio: 0, ..ReactorConfig::default() };
        let err = EventLoopGroup::new(1, "grp", config).unwrap_err();
        assert!(matches!(err, GroupBuildError::InvalidIoRatio(0)));
    }

    #[test]
    fn round_robin_masks_power_of_two_length() {
        let chooser = RoundRobinChooser::new();
        let picks: Vec<usize> = (0..8).map(|_| chooser.next(4)).collect();
        assert_eq!(picks, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn group_of_one_always_picks_the_sole_loop() {
        let group = EventLoopGroup::new(1, "solo-grp", ReactorConfig::default()).unwrap();
        for _ in 0..5 {
            assert!(Arc::ptr_eq(group.next(), &group.loops()[0]));
        }
    }

    #[test]
    fn submit_routes_round_robin_across_two_loops() {
        let group = EventLoopGroup::new(2, "rr-grp", ReactorConfig::default()).unwrap();
        let mut picks = Vec::new();
        for _ in 0..4 {
            let chosen = group.next();
            picks.push(Arc::as_ptr(chosen) as usize);
        }
        assert_eq!(picks[0], picks[2]);
        assert_eq!(picks[1], picks[3]);
        assert_ne!(picks[0], picks[1]);
    }
}
