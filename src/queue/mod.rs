// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Multi-producer, single-consumer task queue (spec.md §4.2).
//!
//! Backed by [`crossbeam_queue`]'s lock-free [`ArrayQueue`] (bounded) and
//! [`SegQueue`] (unbounded) — the same family of structures `bevy_tasks`' async
//! executor uses for its run queues. The consumer side is always the owning
//! loop's thread; producers may be any thread (spec.md §3 "Task").

use crossbeam_queue::{ArrayQueue, SegQueue};

/// An opaque unit of work (spec.md §3 "Task"). Consumed strictly by the owning
/// loop's thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The MPSC task queue backing, chosen at construction time.
enum Backing {
    /// Bounded capacity; [`TaskQueue::offer`] returns `false` once full.
    Bounded(ArrayQueue<Task>),
    /// "Effectively unlimited" — the default (spec.md §4.2).
    Unbounded(SegQueue<Task>),
}

/// Wait-free-enqueue, linearizable-w.r.t.-the-single-consumer FIFO of [`Task`]s.
pub struct TaskQueue {
    backing: Backing,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

impl TaskQueue {
    /// An unbounded queue — the default when no capacity is specified
    /// (spec.md §4.2 "effectively unlimited").
    #[must_use]
    pub fn unbounded() -> Self { Self { backing: Backing::Unbounded(SegQueue::new()) } }

    /// A bounded queue with the given capacity.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self { backing: Backing::Bounded(ArrayQueue::new(capacity.max(1))) }
    }

    /// Enqueues `task`. Returns `false` (and hands the task back via the
    /// caller dropping it) iff a bounded queue is at capacity — this is the
    /// only failure mode (spec.md §4.2 "`offer` returns false when capacity is
    /// exhausted").
    pub fn offer(&self, task: Task) -> bool {
        match &self.backing {
            Backing::Bounded(q) => q.push(task).is_ok(),
            Backing::Unbounded(q) => {
                q.push(task);
                true
            }
        }
    }

    /// Dequeues the next task in FIFO order, or `None` if empty. Must only be
    /// called from the owning loop's thread (spec.md §4.2).
    pub fn pop(&self) -> Option<Task> {
        match &self.backing {
            Backing::Bounded(q) => q.pop(),
            Backing::Unbounded(q) => q.pop(),
        }
    }

    /// `true` iff no task is currently queued. Racy if producers are active
    /// concurrently — intended for the reactor's "is the queue now empty"
    /// check (spec.md §4.5 step 2), not as a synchronization primitive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.backing {
            Backing::Bounded(q) => q.is_empty(),
            Backing::Unbounded(q) => q.is_empty(),
        }
    }

    /// Current length; racy for the same reason as [`Self::is_empty`].
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Bounded(q) => q.len(),
            Backing::Unbounded(q) => q.len(),
        }
    }

    /// The bounded capacity, or `None` for an unbounded queue.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match &self.backing {
            Backing::Bounded(q) => Some(q.capacity()),
            Backing::Unbounded(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn fifo_order_is_preserved_for_single_producer() {
        let q = TaskQueue::unbounded();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = Arc::clone(&order);
            assert!(q.offer(Box::new(move || order.lock().unwrap().push(i))));
        }
        while let Some(task) = q.pop() {
            task();
        }
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_queue_rejects_past_capacity() {
        let q = TaskQueue::bounded(2);
        assert!(q.offer(Box::new(|| {})));
        assert!(q.offer(Box::new(|| {})));
        assert!(!q.offer(Box::new(|| {})));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn enqueue_dequeue_counts_balance_under_contention() {
        let q = Arc::new(TaskQueue::unbounded());
        let produced = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = Arc::clone(&q);
            let produced = Arc::clone(&produced);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let produced = Arc::clone(&produced);
                    q.offer(Box::new(move || {
                        produced.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut consumed = 0;
        while let Some(task) = q.pop() {
            task();
            consumed += 1;
        }
        assert_eq!(consumed, 8000);
        assert_eq!(produced.load(Ordering::SeqCst), 8000);
    }
}
