// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Single-threaded executor (spec.md §4.4): owns one thread, started lazily on
//! first `execute`, draining a [`TaskQueue`] and a scheduled-task heap.
//!
//! [`crate::reactor::EventLoop`] reuses [`ExecutorCore`] by composition rather
//! than inheritance (design note §9 "flatten to two traits ... plus a
//! concrete loop struct that composes an executor struct") — it owns its own
//! `ExecutorCore` and layers the readiness notifier on top instead of
//! subclassing this executor.

mod scheduled;

pub use scheduled::{ScheduledEntry, ScheduledHeap};

use crate::common::{Continuation, SequenceCounter};
use crate::config::ReactorConfig;
use crate::error::SubmitError;
use crate::future::{Future, ListenerExecutor, NotifyTask, Promise};
use crate::queue::{Task, TaskQueue};
use crate::reactor::wakeup::{Waker, WakeupState};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Lifecycle of a loop/executor (spec.md §3 "Event Loop": "Transitions are
/// monotonic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    NotStarted = 0,
    Started = 1,
    ShuttingDown = 2,
    Shutdown = 3,
    Terminated = 4,
}

impl ExecutorState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::ShuttingDown,
            3 => Self::Shutdown,
            _ => Self::Terminated,
        }
    }
}

/// Monotonic lifecycle cell: `try_advance` only ever moves forward.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) const fn new() -> Self { Self(AtomicU8::new(ExecutorState::NotStarted as u8)) }

    pub(crate) fn get(&self) -> ExecutorState { ExecutorState::from_u8(self.0.load(Ordering::SeqCst)) }

    /// Advances to `target` iff `target` is strictly later than the current
    /// state. Returns `true` iff this call performed the transition.
    pub(crate) fn try_advance(&self, target: ExecutorState) -> bool {
        loop {
            let current = self.0.load(Ordering::SeqCst);
            if target as u8 <= current {
                return false;
            }
            if self
                .0
                .compare_exchange(current, target as u8, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub(crate) fn is_at_least(&self, target: ExecutorState) -> bool {
        self.0.load(Ordering::SeqCst) >= target as u8
    }
}

/// Tracks the sliding quiet-period window during graceful shutdown (spec.md
/// §4.3, SPEC_FULL.md §11 "Graceful-shutdown quiet period, concretely").
pub(crate) struct ShutdownWindow {
    pub(crate) quiet_period: Duration,
    pub(crate) hard_deadline: Instant,
    pub(crate) last_activity: Instant,
}

/// Shared state between the public handle (callable from any thread) and the
/// dedicated loop thread. Not itself `execute`-capable — both
/// [`SingleThreadExecutor`] and [`crate::reactor::EventLoop`] wrap one of
/// these and add their own run loop on top.
pub(crate) struct ExecutorCore {
    pub(crate) queue: TaskQueue,
    pub(crate) scheduled: Mutex<ScheduledHeap>,
    pub(crate) seq: SequenceCounter,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) termination: Promise<()>,
    pub(crate) thread_id: OnceLock<ThreadId>,
    pub(crate) wakeup: WakeupState,
    pub(crate) waker: Mutex<Option<Arc<dyn Waker>>>,
    pub(crate) shutdown: Mutex<Option<ShutdownWindow>>,
    pub(crate) park: Condvar,
    pub(crate) park_lock: Mutex<()>,
}

impl ExecutorCore {
    pub(crate) fn new(config: &ReactorConfig) -> Arc<Self> {
        Arc::new(Self {
            queue: TaskQueue::bounded(config.default_max_pending_tasks),
            scheduled: Mutex::new(ScheduledHeap::new()),
            seq: SequenceCounter::new(),
            lifecycle: Lifecycle::new(),
            termination: Promise::new(),
            thread_id: OnceLock::new(),
            wakeup: WakeupState::new(),
            waker: Mutex::new(None),
            shutdown: Mutex::new(None),
            park: Condvar::new(),
            park_lock: Mutex::new(()),
        })
    }

    pub(crate) fn in_event_loop(&self) -> bool {
        self.thread_id.get().is_some_and(|id| *id == std::thread::current().id())
    }

    /// Foreign-thread wakeup fence (spec.md §5). No-op if no waker is
    /// installed yet (the loop thread hasn't finished starting).
    pub(crate) fn wake_if_needed(&self) {
        if self.wakeup.mark_awake_and_should_wake() {
            if let Some(waker) = self.waker.lock().unwrap_or_else(std::sync::PoisonError::into_inner).as_ref() {
                if let Err(e) = waker.wake() {
                    tracing::warn!(error = %e, "failed to wake event loop thread");
                }
            } else {
                // No OS-level waker yet (e.g. a plain condvar-backed
                // executor): still poke the condvar directly.
                let _guard = self.park_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                self.park.notify_all();
            }
        }
    }

    pub(crate) fn offer(&self, task: Task) -> Result<(), SubmitError> {
        if self.lifecycle.is_at_least(ExecutorState::Shutdown) {
            return Err(SubmitError::Shutdown);
        }
        if !self.queue.offer(task) {
            return Err(SubmitError::QueueFull { capacity: self.queue.capacity().unwrap_or(usize::MAX) });
        }
        self.wake_if_needed();
        Ok(())
    }

    pub(crate) fn schedule_task(&self, task: Task, delay: Duration) -> Result<(), SubmitError> {
        if self.lifecycle.is_at_least(ExecutorState::Shutdown) {
            return Err(SubmitError::Shutdown);
        }
        let deadline = Instant::now() + delay;
        let seq = self.seq.next();
        let mut heap = self.scheduled.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let rearm = heap.next_deadline().is_none_or(|current| deadline < current);
        heap.push(ScheduledEntry { deadline, seq, task });
        drop(heap);
        if rearm {
            self.wake_if_needed();
        }
        Ok(())
    }
}

impl ListenerExecutor for ExecutorCore {
    fn in_event_loop(&self) -> bool { ExecutorCore::in_event_loop(self) }

    fn execute_boxed(&self, task: NotifyTask) {
        // Listener-notification tasks bypass lifecycle/backpressure checks —
        // they must run even while shutting down so pending futures still
        // observe their completion.
        self.queue.offer(task);
        self.wake_if_needed();
    }
}

/// Common embedding-surface operations every loop exposes (spec.md §6).
pub trait Executor: Send + Sync {
    /// Enqueues `task`, funnelling a foreign-thread wakeup if needed (spec.md
    /// §4.4).
    ///
    /// # Errors
    ///
    /// [`SubmitError::Shutdown`] once the executor has shut down;
    /// [`SubmitError::QueueFull`] if the bounded queue is exhausted.
    fn execute(&self, task: Task) -> Result<(), SubmitError>;

    /// Wraps `task` in a promise (spec.md §4.4 "`submit` wraps a task in a
    /// promise").
    ///
    /// # Errors
    ///
    /// See [`Executor::execute`].
    fn submit<V, F>(&self, task: F) -> Result<Future<V>, SubmitError>
    where
        V: Send + Clone + 'static,
        F: FnOnce() -> V + Send + 'static;

    /// Inserts `task` into the scheduled-task heap, re-arming the wakeup if
    /// the new deadline is earlier than the currently armed one (spec.md
    /// §4.4).
    ///
    /// # Errors
    ///
    /// See [`Executor::execute`].
    fn schedule(&self, task: Task, delay: Duration) -> Result<(), SubmitError>;

    /// `true` iff the current thread is this executor's owned thread.
    fn in_event_loop(&self) -> bool;

    /// Current lifecycle state (spec.md §3).
    fn state(&self) -> ExecutorState;

    /// Begins graceful shutdown: refuses new work after `timeout`, or once
    /// `quiet_period` has elapsed with no task activity, whichever is sooner
    /// from the hard deadline's perspective (SPEC_FULL.md §11).
    fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Future<()>;
}

/// A single dedicated OS thread draining an [`ExecutorCore`] with a
/// [`Condvar`]-based blocking wait (spec.md §4.4).
pub struct SingleThreadExecutor {
    core: Arc<ExecutorCore>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
    name: String,
}

impl std::fmt::Debug for SingleThreadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadExecutor")
            .field("name", &self.name)
            .field("state", &self.core.lifecycle.get())
            .finish()
    }
}

struct CondvarWaker {
    core: std::sync::Weak<ExecutorCore>,
}

impl Waker for CondvarWaker {
    fn wake(&self) -> std::io::Result<()> {
        if let Some(core) = self.core.upgrade() {
            let _guard = core.park_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            core.park.notify_all();
        }
        Ok(())
    }
}

impl SingleThreadExecutor {
    /// Creates an executor with the given thread name prefix. The thread
    /// isn't spawned until the first [`Executor::execute`]/`submit`/`schedule`
    /// call (spec.md §4.4 "started lazily").
    #[must_use]
    pub fn new(name: impl Into<String>, config: &ReactorConfig) -> Self {
        let core = ExecutorCore::new(config);
        *core.waker.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(Arc::new(CondvarWaker { core: Arc::downgrade(&core) }));
        Self { core, join: Mutex::new(None), name: name.into() }
    }

    fn ensure_started(&self) {
        let mut join = self.join.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if join.is_some() {
            return;
        }
        let core = Arc::clone(&self.core);
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_single_thread_executor(&core))
            .expect("failed to spawn executor thread");
        let _ = core.thread_id.set(handle.thread().id());
        core.lifecycle.try_advance(ExecutorState::Started);
        *join = Some(handle);
    }
}

fn run_single_thread_executor(core: &Arc<ExecutorCore>) {
    loop {
        let now = Instant::now();
        let due = core.scheduled.lock().unwrap_or_else(std::sync::PoisonError::into_inner).drain_due(now);
        for task in due {
            task();
        }
        let mut ran_any = false;
        while let Some(task) = core.queue.pop() {
            task();
            ran_any = true;
            if let Some(window) = core.shutdown.lock().unwrap_or_else(std::sync::PoisonError::into_inner).as_mut() {
                window.last_activity = Instant::now();
            }
        }
        let outcome = if core.lifecycle.get() == ExecutorState::ShuttingDown && shutdown_quiet_expired(core) {
            finish_shutdown(core);
            Continuation::Stop
        } else {
            Continuation::Continue
        };
        if outcome.should_stop() {
            return;
        }
        if ran_any {
            continue;
        }
        let next_deadline =
            core.scheduled.lock().unwrap_or_else(std::sync::PoisonError::into_inner).next_deadline();
        if next_deadline.is_some() {
            core.wakeup.arm_idle_until();
        } else {
            core.wakeup.arm_idle();
        }
        if core.queue.is_empty() {
            park_until(core, next_deadline);
        }
        core.wakeup.mark_awake();
    }
}

fn park_until(core: &ExecutorCore, deadline: Option<Instant>) {
    let guard = core.park_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if !core.queue.is_empty() {
        return;
    }
    match deadline {
        None => {
            drop(core.park.wait(guard).unwrap_or_else(std::sync::PoisonError::into_inner));
        }
        Some(deadline) => {
            if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                drop(
                    core.park
                        .wait_timeout(guard, remaining)
                        .unwrap_or_else(std::sync::PoisonError::into_inner),
                );
            }
        }
    }
}

pub(crate) fn shutdown_quiet_expired(core: &ExecutorCore) -> bool {
    let guard = core.shutdown.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let Some(window) = guard.as_ref() else { return false };
    let now = Instant::now();
    now >= window.hard_deadline || now.duration_since(window.last_activity) >= window.quiet_period
}

fn finish_shutdown(core: &Arc<ExecutorCore>) {
    core.lifecycle.try_advance(ExecutorState::Shutdown);
    core.lifecycle.try_advance(ExecutorState::Terminated);
    drop(core.termination.try_success(()));
}

impl Executor for SingleThreadExecutor {
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
        *self.core.shutdown.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(ShutdownWindow {
            quiet_period,
            hard_deadline: Instant::now() + timeout,
            last_activity: Instant::now(),
        });
        self.core.lifecycle.try_advance(ExecutorState::ShuttingDown);
        self.core.wake_if_needed();
        self.core.termination.future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[test]
    fn execute_runs_on_owned_thread() {
        let exec = SingleThreadExecutor::new("test-exec", &ReactorConfig::default());
        let fut = exec.submit(|| std::thread::current().name().is_some()).unwrap();
        assert!(fut.sync(Some(Duration::from_secs(2))).unwrap());
    }

    #[test]
    fn tasks_run_in_fifo_order_from_a_single_producer() {
        let exec = SingleThreadExecutor::new("fifo-exec", &ReactorConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut futures = Vec::new();
        for i in 0..20 {
            let order = Arc::clone(&order);
            futures.push(exec.submit(move || order.lock().unwrap().push(i)).unwrap());
        }
        for f in futures {
            f.sync(Some(Duration::from_secs(2))).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn scheduled_task_fires_after_delay() {
        let exec = SingleThreadExecutor::new("sched-exec", &ReactorConfig::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        exec.schedule(Box::new(move || { f.fetch_add(1, AtomicOrdering::SeqCst); }), Duration::from_millis(20))
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn submit_after_shutdown_is_refused() {
        let exec = SingleThreadExecutor::new("shutdown-exec", &ReactorConfig::default());
        let term = exec.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(200));
        term.sync(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(exec.state(), ExecutorState::Terminated);
        let err = exec.submit(|| 1).unwrap_err();
        assert!(matches!(err, SubmitError::Shutdown));
    }
}
