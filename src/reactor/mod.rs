// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The reactor loop: a [`crate::executor::SingleThreadExecutor`]-shaped
//! executor that replaces its blocking condvar wait with an OS readiness
//! notifier (spec.md §4.5, specialization of §4.4).
//!
//! Composes [`crate::executor::ExecutorCore`] rather than wrapping
//! [`crate::executor::SingleThreadExecutor`] (design note §9: "flatten ...
//! plus a concrete loop struct that composes an executor struct") — the two
//! share the task queue, scheduled heap, lifecycle, and wakeup-state
//! machinery, but [`EventLoop`] adds the notifier, registration table, and
//! readiness dispatch on top.

mod ready_set;
mod registration;
pub(crate) mod wakeup;

pub use ready_set::{ReadyEntry, ReadySet};
pub use registration::{Attachment, ChannelOps, Interest, Registration, Resource, Token};

use crate::common::Continuation;
use crate::config::{ReactorConfig, CLEANUP_INTERVAL};
use crate::error::{EventLoopError, RegisterError, SubmitError};
use crate::executor::{shutdown_quiet_expired, Executor, ExecutorCore, ExecutorState, ShutdownWindow};
use crate::future::{Future, ListenerExecutor, Promise};
use crate::queue::Task;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

const WAKE_TOKEN: Token = Token(usize::MAX);

struct MioWaker(mio::Waker);

impl wakeup::Waker for MioWaker {
    fn wake(&self) -> std::io::Result<()> { self.0.wake() }
}

struct Entry {
    resource: Box<dyn Resource>,
    interest: Interest,
    attachment: Attachment,
    cancelled: bool,
}

/// Operations a reactor loop exposes beyond the plain [`Executor`] surface
/// (spec.md §4.5, §6 "Registration"/"Interest-set mutation").
pub trait Reactor: Executor {
    /// Binds `resource` to this loop with the given interest set and
    /// attachment.
    ///
    /// Called from the loop's own thread, this fails fast
    /// (invalid-argument/shutdown); called from any other thread, it is
    /// funnelled through the task queue and blocks the caller until the loop
    /// thread processes it (spec.md §6 "Registration").
    ///
    /// # Errors
    ///
    /// See [`RegisterError`].
    fn register<R: Resource>(&self, resource: R, interest: Interest, attachment: Attachment) -> Result<Registration, RegisterError>
    where
        Self: Sized;

    /// Number of live (non-cancelled) registrations (SPEC_FULL.md §11
    /// "Diagnostics accessors").
    fn registered_count(&self) -> usize;
}

impl EventLoop {
    /// Resolves once this loop reaches [`ExecutorState::Terminated`],
    /// independent of whether this call or someone else's
    /// `shutdown_gracefully` triggered it — used by
    /// [`crate::group::EventLoopGroup`] to aggregate termination across the
    /// whole fleet (spec.md §4.3 "installs a listener on each loop's
    /// termination future").
    #[must_use]
    pub fn termination_future(&self) -> Future<()> { self.core.termination.future() }
}

/// A single dedicated OS thread running the readiness-dispatch loop of
/// spec.md §4.5.
pub struct EventLoop {
    core: Arc<ExecutorCore>,
    registry: Mutex<mio::Registry>,
    poll_cell: Mutex<Option<mio::Poll>>,
    table: Mutex<HashMap<Token, Entry>>,
    next_token: AtomicUsize,
    cancelled_keys: AtomicU32,
    select_again: AtomicBool,
    rebuild_generation: AtomicU32,
    config: ReactorConfig,
    name: String,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
    self_weak: Weak<EventLoop>,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("state", &self.core.lifecycle.get())
            .field("registered", &self.registered_count())
            .finish()
    }
}

impl EventLoop {
    /// Opens a fresh readiness notifier and waker, but does not spawn the
    /// dedicated thread yet (spec.md §4.4 "started lazily").
    ///
    /// # Errors
    ///
    /// [`EventLoopError::NotifierOpen`] if the OS notifier or waker could not
    /// be constructed.
    pub fn new(name: impl Into<String>, config: ReactorConfig) -> Result<Arc<Self>, EventLoopError> {
        let poll = mio::Poll::new().map_err(EventLoopError::NotifierOpen)?;
        let registry = poll.registry().try_clone().map_err(EventLoopError::NotifierOpen)?;
        let waker = mio::Waker::new(&registry, WAKE_TOKEN).map_err(EventLoopError::NotifierOpen)?;
        let core = ExecutorCore::new(&config);
        *core.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(MioWaker(waker)) as Arc<dyn wakeup::Waker>);
        Ok(Arc::new_cyclic(|weak| Self {
            core,
            registry: Mutex::new(registry),
            poll_cell: Mutex::new(Some(poll)),
            table: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(0),
            cancelled_keys: AtomicU32::new(0),
            select_again: AtomicBool::new(false),
            rebuild_generation: AtomicU32::new(0),
            config,
            name: name.into(),
            join: Mutex::new(None),
            self_weak: weak.clone(),
        }))
    }

    fn ensure_started(&self) {
        let mut join = self.join.lock().unwrap_or_else(PoisonError::into_inner);
        if join.is_some() {
            return;
        }
        let poll = self.poll_cell.lock().unwrap_or_else(PoisonError::into_inner).take().expect("poll taken exactly once");
        let this = self.self_weak.upgrade().expect("event loop outlives its own startup");
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(&this, poll))
            .expect("failed to spawn reactor thread");
        let _ = self.core.thread_id.set(handle.thread().id());
        self.core.lifecycle.try_advance(ExecutorState::Started);
        *join = Some(handle);
    }

    /// Rebuilds the notifier in place: a fresh `mio::Poll`/`Registry`, every
    /// still-valid entry migrated across, the old notifier dropped (spec.md
    /// §4.5.2).
    fn rebuild_notifier(&self, poll: &mut mio::Poll) -> Result<(), EventLoopError> {
        let new_poll = mio::Poll::new().map_err(EventLoopError::NotifierOpen)?;
        let new_registry = new_poll.registry().try_clone().map_err(EventLoopError::NotifierOpen)?;
        let new_waker = mio::Waker::new(&new_registry, WAKE_TOKEN).map_err(EventLoopError::NotifierOpen)?;

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for (token, entry) in table.iter_mut() {
            if entry.cancelled {
                continue;
            }
            if let Err(e) = new_registry.register(entry.resource.source(), *token, entry.interest.to_mio()) {
                tracing::warn!(token = token.0, error = %e, "failed to migrate registration during notifier rebuild");
                entry.cancelled = true;
                if let Attachment::Channel(channel) = &mut entry.attachment {
                    channel.unregistered(Some(miette::Report::new(e)));
                }
            }
        }
        drop(table);

        *self.registry.lock().unwrap_or_else(PoisonError::into_inner) = new_registry;
        *self.core.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(MioWaker(new_waker)) as Arc<dyn wakeup::Waker>);
        *poll = new_poll;
        self.rebuild_generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn register_now(&self, mut resource: Box<dyn Resource>, interest: Interest, attachment: Attachment) -> Result<Registration, RegisterError> {
        if self.core.lifecycle.is_at_least(ExecutorState::Shutdown) {
            return Err(RegisterError::Shutdown);
        }
        let valid = resource.valid_ops();
        if !interest.is_subset_of(valid) {
            return Err(RegisterError::InvalidInterest { requested: interest, valid });
        }
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(resource.source(), token, interest.to_mio())
            .map_err(RegisterError::Io)?;
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, Entry { resource, interest, attachment, cancelled: false });
        let loop_ref = self.self_weak.upgrade().expect("registration outlives its own loop");
        Ok(Registration { token, loop_ref })
    }

    fn set_interest_now(&self, token: Token, interest: Interest) -> Result<(), RegisterError> {
        if interest.is_empty() {
            return Err(RegisterError::EmptyInterest);
        }
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = table.get_mut(&token).ok_or(RegisterError::Shutdown)?;
        let valid = entry.resource.valid_ops();
        if !interest.is_subset_of(valid) {
            return Err(RegisterError::InvalidInterest { requested: interest, valid });
        }
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reregister(entry.resource.source(), token, interest.to_mio())
            .map_err(RegisterError::Io)?;
        entry.interest = interest;
        Ok(())
    }

    fn cancel_now(&self, token: Token) -> Result<(), RegisterError> {
        let mut entry = self.table.lock().unwrap_or_else(PoisonError::into_inner).remove(&token).ok_or(RegisterError::Shutdown)?;
        let _ = self.registry.lock().unwrap_or_else(PoisonError::into_inner).deregister(entry.resource.source());
        if let Attachment::Channel(channel) = &mut entry.attachment {
            channel.unregistered(None);
        }
        if self.cancelled_keys.fetch_add(1, Ordering::SeqCst) + 1 >= CLEANUP_INTERVAL {
            self.cancelled_keys.store(0, Ordering::SeqCst);
            self.select_again.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_interest(&self, token: Token, interest: Interest) -> Result<(), RegisterError> {
        if self.core.in_event_loop() {
            return self.set_interest_now(token, interest);
        }
        let this = self.self_weak.upgrade().ok_or(RegisterError::Shutdown)?;
        let (tx, rx) = mpsc::sync_channel(1);
        self.core
            .offer(Box::new(move || {
                let _ = tx.send(this.set_interest_now(token, interest));
            }))
            .map_err(|_| RegisterError::SubmitFailed)?;
        rx.recv().map_err(|_| RegisterError::SubmitFailed)?
    }

    fn cancel(&self, token: Token) -> Result<(), RegisterError> {
        if self.core.in_event_loop() {
            return self.cancel_now(token);
        }
        let this = self.self_weak.upgrade().ok_or(RegisterError::Shutdown)?;
        let (tx, rx) = mpsc::sync_channel(1);
        self.core
            .offer(Box::new(move || {
                let _ = tx.send(this.cancel_now(token));
            }))
            .map_err(|_| RegisterError::SubmitFailed)?;
        rx.recv().map_err(|_| RegisterError::SubmitFailed)?
    }

    fn drain_all_registrations(&self) {
        let tokens: Vec<Token> = self.table.lock().unwrap_or_else(PoisonError::into_inner).keys().copied().collect();
        for token in tokens {
            let _ = self.cancel_now(token);
        }
    }

    fn dispatch_one(&self, token: Token, ops: Interest) {
        if token == WAKE_TOKEN {
            return;
        }
        let mut should_cancel = false;
        {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = table.get_mut(&token) else { return };
            if entry.cancelled {
                return;
            }
            let ready_ops = ops.intersection(entry.interest);
            match &mut entry.attachment {
                Attachment::Channel(channel) => {
                    if ready_ops.contains(Interest::CONNECT) {
                        entry.interest = entry.interest.remove(Interest::CONNECT);
                        if let Err(e) = channel.finish_connect() {
                            tracing::warn!(token = token.0, error = %e, "finish_connect failed");
                        }
                    }
                    if ready_ops.contains(Interest::WRITABLE) {
                        if let Err(e) = channel.flush() {
                            tracing::warn!(token = token.0, error = %e, "flush failed");
                        }
                    }
                    if ready_ops.contains(Interest::READABLE) || ready_ops.contains(Interest::ACCEPT) || ready_ops.is_empty() {
                        if let Err(e) = channel.read_or_accept() {
                            tracing::warn!(token = token.0, error = %e, "read_or_accept failed");
                        }
                    }
                }
                Attachment::ReadinessTask(task) => {
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task(ready_ops))).is_err() {
                        tracing::error!(token = token.0, "readiness task panicked; cancelling registration");
                        should_cancel = true;
                    }
                }
            }
        }
        if should_cancel {
            let _ = self.cancel_now(token);
        }
    }

    /// Iterates the append-only [`ReadySet`] buffer (spec.md §4.6), honoring
    /// the "select again" restart when the cancel threshold is crossed
    /// mid-iteration (spec.md §4.5.1).
    fn dispatch_ready_set(&self, ready: &mut ReadySet, poll: &mut mio::Poll) -> usize {
        let mut dispatched = 0;
        let mut index = 0;
        while index < ready.size() {
            let Some(entry) = ready.take(index) else {
                index += 1;
                continue;
            };
            index += 1;
            dispatched += 1;
            self.dispatch_one(entry.token, entry.ops);
            if self.select_again.swap(false, Ordering::SeqCst) {
                let mut more = mio::Events::with_capacity(ready.size().max(64));
                if let Err(e) = poll.poll(&mut more, Some(Duration::ZERO)) {
                    tracing::warn!(error = %e, "select-again poll failed");
                }
                ready.reset_from(&more);
                index = 0;
            }
        }
        dispatched
    }

    /// Fallback path when `disable_key_set_optimization` is set: dispatches
    /// straight off `mio::Events` without the reusable [`ReadySet`] buffer
    /// (spec.md §4.6 "the fallback path is the authoritative behavior, not
    /// an error").
    fn dispatch_events(&self, events: &mio::Events) -> usize {
        let mut dispatched = 0;
        for event in events {
            dispatched += 1;
            self.dispatch_one(event.token(), Interest::from_event(event));
        }
        dispatched
    }
}

impl ListenerExecutor for EventLoop {
    fn in_event_loop(&self) -> bool { self.core.in_event_loop() }

    fn execute_boxed(&self, task: crate::future::NotifyTask) { self.core.execute_boxed(task); }
}

impl Executor for EventLoop {
    fn execute(&self, task: Task) -> Result<(), SubmitError> {
        self.ensure_started();
        self.core.offer(task)
    }

    fn submit<V, F>(&self, task: F) -> Result<Future<V>, SubmitError>
    where
        V: Send + Clone + 'static,
        F: FnOnce() -> V + Send + 'static,
    {
        self.ensure_started();
        let promise: Promise<V> = Promise::with_executor(Arc::clone(&self.core) as Arc<dyn ListenerExecutor>);
        let future = promise.future();
        self.core.offer(Box::new(move || {
            drop(promise.try_success(task()));
        }))?;
        Ok(future)
    }

    fn schedule(&self, task: Task, delay: Duration) -> Result<(), SubmitError> {
        self.ensure_started();
        self.core.schedule_task(task, delay)
    }

    fn in_event_loop(&self) -> bool { self.core.in_event_loop() }

    fn state(&self) -> ExecutorState { self.core.lifecycle.get() }

    fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Future<()> {
        self.ensure_started();
        *self.core.shutdown.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ShutdownWindow { quiet_period, hard_deadline: Instant::now() + timeout, last_activity: Instant::now() });
        self.core.lifecycle.try_advance(ExecutorState::ShuttingDown);
        self.core.wake_if_needed();
        self.core.termination.future()
    }
}

impl Reactor for EventLoop {
    fn register<R: Resource>(&self, resource: R, interest: Interest, attachment: Attachment) -> Result<Registration, RegisterError> {
        if interest.is_empty() {
            return Err(RegisterError::EmptyInterest);
        }
        self.ensure_started();
        let boxed: Box<dyn Resource> = Box::new(resource);
        if self.core.in_event_loop() {
            return self.register_now(boxed, interest, attachment);
        }
        let this = self.self_weak.upgrade().ok_or(RegisterError::Shutdown)?;
        let (tx, rx) = mpsc::sync_channel(1);
        let mut slot = Some((boxed, attachment));
        self.core
            .offer(Box::new(move || {
                let (resource, attachment) = slot.take().expect("set above");
                let _ = tx.send(this.register_now(resource, interest, attachment));
            }))
            .map_err(|_| RegisterError::SubmitFailed)?;
        rx.recv().map_err(|_| RegisterError::SubmitFailed)?
    }

    fn registered_count(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).values().filter(|e| !e.cancelled).count()
    }
}

/// The dedicated-thread run loop (spec.md §4.5 steps 1-6).
fn run(this: &Arc<EventLoop>, mut poll: mio::Poll) {
    let mut events = mio::Events::with_capacity(1024);
    let mut ready_set = ReadySet::new();
    let mut select_cnt: u32 = 0;

    loop {
        let now = Instant::now();
        let due = this.core.scheduled.lock().unwrap_or_else(PoisonError::into_inner).drain_due(now);
        for task in due {
            task();
        }

        let deadline = this.core.scheduled.lock().unwrap_or_else(PoisonError::into_inner).next_deadline();
        let mut woke_from_poll = false;
        let queue_empty = this.core.queue.is_empty();
        // Queue non-empty: still poll, but non-blocking (spec.md §4.5 step 1
        // "fall through to a non-blocking poll"), so queued tasks never
        // starve registered channels of readiness dispatch.
        let timeout = if queue_empty {
            if deadline.is_some() {
                this.core.wakeup.arm_idle_until();
            } else {
                this.core.wakeup.arm_idle();
            }
            deadline.map(|d| d.checked_duration_since(Instant::now()).unwrap_or(Duration::ZERO))
        } else {
            Some(Duration::ZERO)
        };
        match poll.poll(&mut events, timeout) {
            Ok(()) => woke_from_poll = true,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                select_cnt = 0;
                tracing::debug!("reactor poll interrupted");
            }
            Err(e) => {
                tracing::error!(error = %e, "reactor poll failed");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        if queue_empty {
            this.core.wakeup.mark_awake();
        }

        let io_start = Instant::now();
        let dispatched = if woke_from_poll {
            if this.config.disable_key_set_optimization {
                this.dispatch_events(&events)
            } else {
                ready_set.reset_from(&events);
                this.dispatch_ready_set(&mut ready_set, &mut poll)
            }
        } else {
            0
        };
        let io_elapsed = io_start.elapsed();

        let mut ran_any = false;
        if this.config.io_ratio >= 100 {
            while let Some(task) = this.core.queue.pop() {
                task();
                ran_any = true;
            }
        } else if dispatched == 0 {
            if let Some(task) = this.core.queue.pop() {
                task();
                ran_any = true;
            }
        } else {
            let ratio = f64::from(100 - this.config.io_ratio) / f64::from(this.config.io_ratio);
            let budget = io_elapsed.mul_f64(ratio);
            let budget_start = Instant::now();
            while budget_start.elapsed() < budget {
                match this.core.queue.pop() {
                    Some(task) => {
                        task();
                        ran_any = true;
                    }
                    None => break,
                }
            }
        }
        if let Some(window) = this.core.shutdown.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            if ran_any {
                window.last_activity = Instant::now();
            }
        }

        if woke_from_poll && dispatched == 0 && !ran_any {
            select_cnt += 1;
        } else {
            select_cnt = 0;
        }
        if let Some(threshold) = this.config.effective_rebuild_threshold() {
            if select_cnt >= threshold {
                match this.rebuild_notifier(&mut poll) {
                    Ok(()) => tracing::warn!(count = select_cnt, "reactor notifier rebuilt after spurious wakeups"),
                    Err(e) => tracing::error!(error = %e, "notifier rebuild failed"),
                }
                select_cnt = 0;
            }
        }

        let outcome = if this.core.lifecycle.get() == ExecutorState::ShuttingDown {
            this.drain_all_registrations();
            if shutdown_quiet_expired(&this.core) {
                this.core.lifecycle.try_advance(ExecutorState::Shutdown);
                this.core.lifecycle.try_advance(ExecutorState::Terminated);
                drop(this.core.termination.try_success(()));
                Continuation::Stop
            } else {
                Continuation::Continue
            }
        } else {
            Continuation::Continue
        };
        if outcome.should_stop() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration;

    fn init_tracing() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }

    #[test]
    #[serial]
    fn register_with_empty_interest_is_rejected() {
        init_tracing();
        let ev_loop = EventLoop::new("test-loop", ReactorConfig::default()).unwrap();
        let (a, _b) = mio::net::UnixStream::pair().unwrap();
        let err = ev_loop.register(a, Interest::empty(), Attachment::ReadinessTask(Box::new(|_| {}))).unwrap_err();
        assert!(matches!(err, RegisterError::EmptyInterest));
    }

    #[test]
    #[serial]
    fn readiness_task_fires_on_socket_pair_write() {
        init_tracing();
        let ev_loop = EventLoop::new("test-loop-2", ReactorConfig::default()).unwrap();
        let (a, mut b) = mio::net::UnixStream::pair().unwrap();
        let fired = Arc::new(StdAtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let _registration = ev_loop
            .register(a, Interest::READABLE, Attachment::ReadinessTask(Box::new(move |_ops| { f.fetch_add(1, Ordering::SeqCst); })))
            .unwrap();
        std::io::Write::write_all(&mut b, b"x").unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    #[serial]
    fn registered_count_reflects_cancellation() {
        init_tracing();
        let ev_loop = EventLoop::new("test-loop-3", ReactorConfig::default()).unwrap();
        let (a, _b) = mio::net::UnixStream::pair().unwrap();
        let registration = ev_loop.register(a, Interest::READABLE, Attachment::ReadinessTask(Box::new(|_| {}))).unwrap();
        assert_eq!(ev_loop.registered_count(), 1);
        registration.cancel().unwrap();
        assert_eq!(ev_loop.registered_count(), 0);
    }
}
