//! Blocking multi-producer FIFO queue owned by a worker.
//!
//! Producers call [`MessageQueue::enqueue`] from any thread. The single
//! consumer calls [`MessageQueue::dequeue_all`], which sleeps until at least
//! one item is present and then takes the *whole* buffer in one step, so a
//! consumer must always loop over the returned batch.
//!
//! Closing the queue is the shutdown handshake: later enqueues are refused
//! with [`QueueClosed`] (handing the item back) and a blocked consumer wakes
//! with [`DequeueStatus::Closed`].

use crate::error::QueueClosed;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct QueueState<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

/// Result of a blocking dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueStatus {
    /// `n` items were appended to the output buffer.
    Received(usize),
    /// The queue was closed; nothing more will arrive.
    Closed,
    /// A timed wait elapsed with the queue still empty.
    TimedOut,
}

/// Thread-safe FIFO with dequeue-all semantics.
#[derive(Debug)]
pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    // A panicking producer cannot leave the buffer half-written, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one item and wakes the consumer.
    pub fn enqueue(&self, item: T) -> Result<(), QueueClosed<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueClosed(item));
        }
        state.buffer.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Appends a batch under one lock, preserving its order.
    ///
    /// On a closed queue the whole batch is handed back.
    pub fn enqueue_all(&self, items: Vec<T>) -> Result<(), QueueClosed<Vec<T>>> {
        if items.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        if state.closed {
            return Err(QueueClosed(items));
        }
        state.buffer.extend(items);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until items are available, then moves all of them into `out`.
    pub fn dequeue_all(&self, out: &mut Vec<T>) -> DequeueStatus {
        let mut state = self.lock();
        loop {
            if !state.buffer.is_empty() {
                let count = state.buffer.len();
                out.extend(state.buffer.drain(..));
                return DequeueStatus::Received(count);
            }
            if state.closed {
                return DequeueStatus::Closed;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`dequeue_all`](Self::dequeue_all) but gives up after `timeout`.
    pub fn dequeue_all_timeout(&self, out: &mut Vec<T>, timeout: Duration) -> DequeueStatus {
        let state = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.buffer.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if !state.buffer.is_empty() {
            let count = state.buffer.len();
            out.extend(state.buffer.drain(..));
            DequeueStatus::Received(count)
        } else if state.closed {
            DequeueStatus::Closed
        } else {
            DequeueStatus::TimedOut
        }
    }

    /// Non-blocking variant; returns how many items were moved.
    pub fn try_dequeue_all(&self, out: &mut Vec<T>) -> usize {
        let mut state = self.lock();
        let count = state.buffer.len();
        out.extend(state.buffer.drain(..));
        count
    }

    /// Refuses further enqueues and wakes every waiting consumer.
    ///
    /// Returns `false` when the queue had already been closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        let was_open = !state.closed;
        state.closed = true;
        drop(state);
        self.available.notify_all();
        was_open
    }

    /// Removes and returns whatever is still buffered.
    pub fn drain_remaining(&self) -> Vec<T> {
        self.lock().buffer.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
