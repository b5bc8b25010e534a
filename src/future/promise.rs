// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`Future`]/[`Promise`]: the single-assignment completion primitive (spec.md
//! §3 "Future<V>", §4.1).

use super::listener::{global_notifier, ListenerExecutor};
use crate::common::SequenceCounter;
use crate::error::AwaitError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

static LISTENER_IDS: SequenceCounter = SequenceCounter::new();

/// Opaque handle returned by [`Future::add_listener`], usable with
/// [`Future::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The terminal outcome of a [`Future`]: success, failure, or cancellation.
enum State<V> {
    Incomplete,
    Success(V),
    Failure(Arc<miette::Report>),
    Cancelled(Arc<miette::Report>),
}

impl<V> State<V> {
    const fn is_done(&self) -> bool { !matches!(self, Self::Incomplete) }
}

type Listener<V> = Box<dyn FnOnce(&Future<V>) + Send>;

struct Inner<V> {
    state: Mutex<State<V>>,
    done_cv: Condvar,
    listeners: Mutex<Vec<(ListenerId, Listener<V>)>>,
    uncancellable: Mutex<bool>,
    executor: Arc<dyn ListenerExecutor>,
}

/// The read side of a [`Promise`]: single-assignment outcome cell with
/// listener chains (spec.md §4.1).
///
/// Cloning a `Future` clones the handle, not the state — all clones observe
/// the same terminal transition.
pub struct Future<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Future<V> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<V> std::fmt::Debug for Future<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let label = match &*state {
            State::Incomplete => "Incomplete",
            State::Success(_) => "Success",
            State::Failure(_) => "Failure",
            State::Cancelled(_) => "Cancelled",
        };
        f.debug_struct("Future").field("state", &label).finish()
    }
}

/// The write side of a [`Future`]: `try_success`/`try_failure`/`cancel` each
/// succeed at most once, combined (spec.md §4.1 contract).
pub struct Promise<V> {
    inner: Arc<Inner<V>>,
}

impl<V> std::fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("future", &self.future()).finish()
    }
}

impl<V: Send + Clone + 'static> Promise<V> {
    /// Creates a promise notified on the global fallback executor (spec.md
    /// §4.1 "the global one if unassociated").
    #[must_use]
    pub fn new() -> Self { Self::with_executor(global_notifier()) }

    /// Creates a promise associated with a specific executor — used when a
    /// loop creates a promise for its own submissions, so listeners added from
    /// the loop thread run inline (spec.md §4.1).
    #[must_use]
    pub fn with_executor(executor: Arc<dyn ListenerExecutor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Incomplete),
                done_cv: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                uncancellable: Mutex::new(false),
                executor,
            }),
        }
    }

    /// Returns a read-side handle sharing this promise's state.
    #[must_use]
    pub fn future(&self) -> Future<V> { Future { inner: Arc::clone(&self.inner) } }

    /// Attempts the terminal transition to success. Returns `false` without
    /// side effects if already terminal.
    pub fn try_success(&self, value: V) -> bool { self.complete(State::Success(value)) }

    /// Attempts the terminal transition to failure.
    pub fn try_failure(&self, cause: miette::Report) -> bool {
        self.complete(State::Failure(Arc::new(cause)))
    }

    /// Prevents future `cancel()` calls from succeeding, unless the promise is
    /// already cancelled. Returns `false` iff the promise was already
    /// cancelled (too late to protect).
    pub fn set_uncancellable(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if matches!(&*state, State::Cancelled(_)) {
            return false;
        }
        *self.inner.uncancellable.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = true;
        true
    }

    fn complete(&self, new_state: State<V>) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_done() {
            return false;
        }
        *state = new_state;
        drop(state);
        self.inner.done_cv.notify_all();
        notify_all_listeners(&self.inner, &self.future());
        true
    }
}

impl<V: Send + Clone + 'static> Default for Promise<V> {
    fn default() -> Self { Self::new() }
}

impl<V: Send + Clone + 'static> Future<V> {
    /// `true` once a terminal state has been set.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_done()
    }

    /// `true` iff terminal and successful.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            &*self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            State::Success(_)
        )
    }

    /// `true` iff terminal and cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            State::Cancelled(_)
        )
    }

    /// `true` iff still incomplete and not marked uncancellable.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_done() {
            return false;
        }
        !*self.inner.uncancellable.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The stored failure/cancellation cause, if terminal and not successful.
    #[must_use]
    pub fn cause(&self) -> Option<Arc<miette::Report>> {
        match &*self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) {
            State::Failure(c) | State::Cancelled(c) => Some(Arc::clone(c)),
            State::Incomplete | State::Success(_) => None,
        }
    }

    /// Returns the success value immediately if done, without blocking.
    #[must_use]
    pub fn get_now(&self) -> Option<V> {
        match &*self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) {
            State::Success(v) => Some(v.clone()),
            State::Incomplete | State::Failure(_) | State::Cancelled(_) => None,
        }
    }

    /// Blocks until terminal or `timeout` elapses (`None` blocks indefinitely).
    /// Never rethrows; check [`Self::cause`] afterwards if needed.
    ///
    /// # Errors
    ///
    /// [`AwaitError::WouldDeadlock`] if called from the owning executor's own
    /// thread while still incomplete (spec.md §4.1 "Failure modes").
    pub fn await_result(&self, timeout: Option<Duration>) -> Result<bool, AwaitError> {
        let mut state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !state.is_done() && self.inner.executor.in_event_loop() {
            return Err(AwaitError::WouldDeadlock);
        }
        let deadline = timeout.map(|d| Instant::now() + d);
        while !state.is_done() {
            match deadline {
                None => {
                    state = self
                        .inner
                        .done_cv
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return Ok(false);
                    };
                    let (guard, timeout_result) = self
                        .inner
                        .done_cv
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                    if timeout_result.timed_out() && !state.is_done() {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// `await_result` followed by rethrowing the stored cause on
    /// failure/cancellation (spec.md §4.1 "`sync` = await + rethrow cause").
    ///
    /// # Errors
    ///
    /// [`AwaitError::TimedOut`] if the timeout elapses;
    /// [`AwaitError::WouldDeadlock`] under the same condition as
    /// [`Self::await_result`]; [`AwaitError::Failed`] wrapping the stored
    /// cause if the future did not succeed.
    pub fn sync(&self, timeout: Option<Duration>) -> Result<V, AwaitError> {
        if !self.await_result(timeout)? {
            return Err(AwaitError::TimedOut);
        }
        match &*self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) {
            State::Success(v) => Ok(v.clone()),
            State::Failure(c) | State::Cancelled(c) => {
                Err(AwaitError::Failed(miette::Report::msg(c.to_string())))
            }
            State::Incomplete => unreachable!("await_result returned true for an incomplete state"),
        }
    }

    /// Registers a listener. If already terminal, it is dispatched
    /// immediately under the same inline-vs-enqueue rule as a fresh
    /// completion (spec.md §4.1 "every later-added listener is scheduled
    /// immediately on add").
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let id = ListenerId(LISTENER_IDS.next());
        let mut pending: Option<Listener<V>> = Some(Box::new(listener));
        let already_done = {
            let state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.is_done() {
                true
            } else {
                self.inner
                    .listeners
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push((id, pending.take().expect("set above")));
                false
            }
        };
        if already_done {
            dispatch_one(&self.inner.executor, pending.take().expect("set above"), self);
        }
        id
    }

    /// Registers multiple listeners in order, equivalent to calling
    /// [`Self::add_listener`] for each.
    pub fn add_listeners<F, I>(&self, listeners: I) -> Vec<ListenerId>
    where
        F: FnOnce(&Self) + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        listeners.into_iter().map(|l| self.add_listener(l)).collect()
    }

    /// Removes a previously-added listener. No-op if already fired or already
    /// removed. Adding then removing a listener leaves the future
    /// observationally unchanged (spec.md §8 round-trip property).
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Advisory cancellation (spec.md §5 "Cancellation and timeouts"). Returns
    /// `false` if not cancellable. `may_interrupt` is accepted for API parity
    /// with the embedding surface but this core has no interruptible workers
    /// to signal — the transition itself is the only effect.
    pub fn cancel(&self, _may_interrupt: bool) -> bool {
        if !self.is_cancellable() {
            return false;
        }
        let cause = Arc::new(miette::Report::msg("future was cancelled"));
        let mut state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.is_done() {
            return false;
        }
        *state = State::Cancelled(cause);
        drop(state);
        self.inner.done_cv.notify_all();
        notify_all_listeners(&self.inner, self);
        true
    }
}

fn notify_all_listeners<V: Send + Clone + 'static>(inner: &Arc<Inner<V>>, future: &Future<V>) {
    let pending: Vec<(ListenerId, Listener<V>)> =
        std::mem::take(&mut *inner.listeners.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
    if pending.is_empty() {
        return;
    }
    let future = future.clone();
    let executor = Arc::clone(&inner.executor);
    let run_all = move || {
        for (_, listener) in pending {
            let future = future.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(&future))).is_err() {
                tracing::error!("future listener panicked; isolated, siblings still run");
            }
        }
    };
    if executor.in_event_loop() {
        run_all();
    } else {
        executor.execute_boxed(Box::new(run_all));
    }
}

fn dispatch_one<V: Send + Clone + 'static>(
    executor: &Arc<dyn ListenerExecutor>,
    listener: Listener<V>,
    future: &Future<V>,
) {
    let future = future.clone();
    let run = move || {
        if catch_unwind(AssertUnwindSafe(|| listener(&future))).is_err() {
            tracing::error!("future listener panicked; isolated, siblings still run");
        }
    };
    if executor.in_event_loop() {
        run();
    } else {
        executor.execute_boxed(Box::new(run));
    }
}
