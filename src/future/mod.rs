// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Future/Promise: the single-assignment completion primitive (spec.md §3
//! "Future<V>", §4.1). Used everywhere in the reactor core — task
//! submission, scheduling, registration, and graceful shutdown all return a
//! [`Future`].

mod listener;
mod promise;

pub use listener::{global_notifier, GlobalNotifier, ListenerExecutor, NotifyTask};
pub use promise::{Future, ListenerId, Promise};
