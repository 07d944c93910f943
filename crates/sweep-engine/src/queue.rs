//! Thread-safe FIFO work queue with lease tracking.
//!
//! Items move `pending -> leased -> (done | deferred)`. Leased and deferred
//! items stay part of [`WorkQueue::snapshot`], so a checkpoint taken while a
//! worker is mid-scan still contains the cell it is scanning.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Blocking, unbounded FIFO shared by the scheduler and its workers.
pub struct WorkQueue<T> {
    inner: Mutex<QueueState<T>>,
    available: Condvar,
}

struct QueueState<T> {
    pending: VecDeque<T>,
    leased: Vec<T>,
    deferred: Vec<T>,
    closed: bool,
}

impl<T: Clone + PartialEq> WorkQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                pending: VecDeque::new(),
                leased: Vec::new(),
                deferred: Vec::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append items in order; hands them back if the queue is already closed.
    pub fn enqueue_all<I>(&self, items: I) -> Result<usize, Vec<T>>
    where
        I: IntoIterator<Item = T>,
    {
        let mut guard = self.state();
        if guard.closed {
            return Err(items.into_iter().collect());
        }
        let before = guard.pending.len();
        guard.pending.extend(items);
        let added = guard.pending.len() - before;
        self.available.notify_all();
        Ok(added)
    }

    /// Seal the queue: no more items will arrive, and consumers blocked on an
    /// empty queue are woken up to observe exhaustion.
    pub fn close(&self) {
        let mut guard = self.state();
        guard.closed = true;
        self.available.notify_all();
    }

    /// Whether [`WorkQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Block until an item is available; `None` once the queue is closed and drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut guard = self.state();
        loop {
            if let Some(item) = guard.pending.pop_front() {
                guard.leased.push(item.clone());
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take the head item without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut guard = self.state();
        let item = guard.pending.pop_front()?;
        guard.leased.push(item.clone());
        Some(item)
    }

    /// Release a leased item as done. `false` if it was not leased.
    pub fn complete(&self, item: &T) -> bool {
        let mut guard = self.state();
        match guard.leased.iter().position(|i| i == item) {
            Some(idx) => {
                guard.leased.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Park a leased item for a later run. `false` if it was not leased.
    pub fn defer(&self, item: &T) -> bool {
        let mut guard = self.state();
        match guard.leased.iter().position(|i| i == item) {
            Some(idx) => {
                let item = guard.leased.remove(idx);
                guard.deferred.push(item);
                true
            }
            None => false,
        }
    }

    /// Items not yet handed out.
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Items not yet finished this run: pending plus leased.
    pub fn outstanding_len(&self) -> usize {
        let guard = self.state();
        guard.pending.len() + guard.leased.len()
    }

    /// Items parked for the next run.
    pub fn deferred_len(&self) -> usize {
        self.state().deferred.len()
    }

    /// Everything still owed: leased (oldest first), then pending in queue
    /// order, then deferred.
    pub fn snapshot(&self) -> Vec<T> {
        let guard = self.state();
        let mut out = Vec::with_capacity(guard.leased.len() + guard.pending.len() + guard.deferred.len());
        out.extend(guard.leased.iter().cloned());
        out.extend(guard.pending.iter().cloned());
        out.extend(guard.deferred.iter().cloned());
        out
    }
}

impl<T: Clone + PartialEq> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
