// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The executor abstraction [`Future`](super::Future)/[`Promise`](super::Promise)
//! notify listeners on, plus the process-global fallback executor for
//! promises that aren't associated with any particular loop.
//!
//! This trait is deliberately narrower than [`crate::executor::Executor`] — it
//! only needs "am I the owning thread" and "run this closure over there" to
//! implement the notification rule in spec.md §4.1. Keeping it narrow (rather
//! than depending on [`crate::executor::Executor`] directly) avoids a module
//! cycle between `future` and `executor`; [`crate::executor::SingleThreadExecutor`]
//! implements this trait in terms of its own `execute`.

use std::sync::{mpsc, Arc, OnceLock};

/// A boxed, one-shot unit of work dispatched to notify listeners.
pub type NotifyTask = Box<dyn FnOnce() + Send + 'static>;

/// Minimal executor abstraction a [`Promise`](super::Promise) notifies
/// listeners on (spec.md §4.1 "Listener notification").
pub trait ListenerExecutor: Send + Sync + 'static {
    /// `true` iff the calling thread is this executor's owned thread.
    fn in_event_loop(&self) -> bool;

    /// Runs `task` on the owning thread, queuing it if called from elsewhere.
    fn execute_boxed(&self, task: NotifyTask);
}

/// The process-global notification executor for promises created without an
/// associated loop (spec.md §4.1 "the global one if unassociated", design note
/// §9 "no runtime singletons beyond a process-global notification executor").
///
/// Backed by a single dedicated background thread draining an
/// [`std::sync::mpsc`] channel — deliberately simpler than the MPSC
/// [`crate::queue::TaskQueue`] used by real loops, since this executor has no
/// readiness notifier to interleave with and no time budget to enforce.
pub struct GlobalNotifier {
    sender: mpsc::Sender<NotifyTask>,
    thread_id: std::thread::ThreadId,
}

impl GlobalNotifier {
    fn spawn() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<NotifyTask>();
        let handle = std::thread::Builder::new()
            .name("reactor-global-notifier".to_owned())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .expect("failed to spawn global notifier thread");
        Arc::new(Self { sender, thread_id: handle.thread().id() })
    }
}

impl ListenerExecutor for GlobalNotifier {
    fn in_event_loop(&self) -> bool { std::thread::current().id() == self.thread_id }

    fn execute_boxed(&self, task: NotifyTask) {
        // The background thread only exits on process shutdown; a send error
        // here would mean it already panicked, which we simply drop rather
        // than propagate (there is no embedder-visible handle to report to).
        drop(self.sender.send(task));
    }
}

static GLOBAL_NOTIFIER: OnceLock<Arc<GlobalNotifier>> = OnceLock::new();

/// Returns the lazily-initialized, process-wide fallback executor.
pub fn global_notifier() -> Arc<GlobalNotifier> {
    Arc::clone(GLOBAL_NOTIFIER.get_or_init(GlobalNotifier::spawn))
}
