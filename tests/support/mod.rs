// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Shared test setup for the integration suite (SPEC_FULL.md §10.4):
//! installs a `tracing_subscriber::EnvFilter` subscriber once per test
//! binary so `RUST_LOG` controls verbosity when diagnosing a failing run.

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
