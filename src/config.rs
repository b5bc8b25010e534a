// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-wide configuration knobs (spec.md §6 "Configuration knobs").
//!
//! Per design note §9 ("Global mutable state"), these are read once at startup
//! into an immutable [`ReactorConfig`] value and threaded explicitly into
//! [`crate::group::EventLoopGroup::new`]/[`crate::reactor::EventLoop::new`] —
//! there is no runtime-mutable global.

use std::env;

/// Floor for [`ReactorConfig::selector_auto_rebuild_threshold`]; `0` disables
/// rebuild entirely (spec.md §6).
pub const MIN_AUTO_REBUILD_THRESHOLD: u32 = 3;

/// Default for [`ReactorConfig::selector_auto_rebuild_threshold`] (spec.md §4.5
/// step 5).
pub const DEFAULT_AUTO_REBUILD_THRESHOLD: u32 = 512;

/// Default for [`ReactorConfig::io_ratio`] (spec.md §6).
pub const DEFAULT_IO_RATIO: u8 = 50;

/// Default for [`ReactorConfig::default_max_pending_tasks`]. "Effectively
/// unlimited" per spec.md §4.2; chosen large enough that no realistic
/// workload hits it while still bounding runaway producers.
pub const DEFAULT_MAX_PENDING_TASKS: usize = 1 << 20;

/// Cancelled-registration flush threshold (spec.md §4.5.1 "Cancel threshold").
/// Not currently exposed as an env override since it is an internal tuning
/// constant rather than a deployment knob, but kept alongside the other
/// thresholds for discoverability.
pub const CLEANUP_INTERVAL: u32 = 256;

/// Immutable, process-wide reactor configuration.
///
/// Construct via [`ReactorConfig::default`] or [`ReactorConfig::from_env`];
/// there is no setter — a `ReactorConfig` is fixed for the lifetime of every
/// [`crate::group::EventLoopGroup`]/[`crate::reactor::EventLoop`] built from
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Disables the §4.6 append-only readiness-set substitution even on
    /// platforms that support it.
    pub disable_key_set_optimization: bool,

    /// Consecutive spurious notifier returns before the notifier is rebuilt.
    /// `0` disables rebuild. Clamped to `>= 3` otherwise (spec.md §6).
    pub selector_auto_rebuild_threshold: u32,

    /// Share of each loop iteration spent draining tasks vs. dispatching I/O,
    /// in `1..=100` (spec.md §4.5 step 4).
    pub io_ratio: u8,

    /// Capacity for MPSC queues constructed without an explicit capacity.
    pub default_max_pending_tasks: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            disable_key_set_optimization: false,
            selector_auto_rebuild_threshold: DEFAULT_AUTO_REBUILD_THRESHOLD,
            io_ratio: DEFAULT_IO_RATIO,
            default_max_pending_tasks: DEFAULT_MAX_PENDING_TASKS,
        }
    }
}

impl ReactorConfig {
    /// Builds a config from `REACTOR_*` environment variables, falling back to
    /// [`ReactorConfig::default`] for anything unset or unparsable.
    ///
    /// Read once at process startup; the result should be reused, not
    /// re-queried per loop.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            disable_key_set_optimization: env_flag(
                "REACTOR_DISABLE_KEY_SET_OPTIMIZATION",
                defaults.disable_key_set_optimization,
            ),
            selector_auto_rebuild_threshold: env_u32(
                "REACTOR_SELECTOR_AUTO_REBUILD_THRESHOLD",
                defaults.selector_auto_rebuild_threshold,
            ),
            io_ratio: env_u8("REACTOR_IO_RATIO", defaults.io_ratio).clamp(1, 100),
            default_max_pending_tasks: env_usize(
                "REACTOR_DEFAULT_MAX_PENDING_TASKS",
                defaults.default_max_pending_tasks,
            ),
        }
    }

    /// The effective rebuild threshold: `0` means disabled, anything else is
    /// clamped to the floor of [`MIN_AUTO_REBUILD_THRESHOLD`].
    #[must_use]
    pub fn effective_rebuild_threshold(&self) -> Option<u32> {
        match self.selector_auto_rebuild_threshold {
            0 => None,
            n => Some(n.max(MIN_AUTO_REBUILD_THRESHOLD)),
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key).ok().map_or(default, |v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ReactorConfig::default();
        assert_eq!(cfg.io_ratio, 50);
        assert_eq!(cfg.selector_auto_rebuild_threshold, 512);
        assert!(!cfg.disable_key_set_optimization);
    }

    #[test]
    fn rebuild_threshold_floor_is_enforced() {
        let cfg = ReactorConfig { selector_auto_rebuild_threshold: 1, ..ReactorConfig::default() };
        assert_eq!(cfg.effective_rebuild_threshold(), Some(MIN_AUTO_REBUILD_THRESHOLD));
    }

    #[test]
    fn zero_threshold_disables_rebuild() {
        let cfg = ReactorConfig { selector_auto_rebuild_threshold: 0, ..ReactorConfig::default() };
        assert_eq!(cfg.effective_rebuild_threshold(), None);
    }
}
