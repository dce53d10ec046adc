//! Capacity-bounded blocking queue with cooperative cancellation.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct State<T> {
    queue: VecDeque<T>,
    canceled: bool,
}

/// Fixed-capacity FIFO handoff between pipeline stages.
///
/// `append` blocks while the queue is full, `read` while it is empty. After
/// [`cancel`](Self::cancel), appends are dropped and readers drain what was
/// queued before receiving `None`.
pub struct BoundedChannel<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State { queue: VecDeque::with_capacity(capacity), canceled: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue `item`, blocking while the queue is full.
    /// Returns false, dropping the item, once the channel is canceled.
    pub fn append(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.queue.len() >= self.capacity && !state.canceled {
            self.not_full.wait(&mut state);
        }
        if state.canceled {
            return false;
        }
        state.queue.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue the oldest item, blocking while the queue is empty.
    /// Returns `None` once the channel is canceled and drained.
    pub fn read(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.canceled {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Stop accepting items and wake every blocked caller. Idempotent.
    pub fn cancel(&self) {
        self.state.lock().canceled = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Write handle shared by the producers of one channel.
///
/// Clones share a registration; when the last clone is dropped the channel
/// is canceled, so consumers drain it and stop.
pub struct Producer<T> {
    inner: Arc<ProducerInner<T>>,
}

struct ProducerInner<T> {
    channel: Arc<BoundedChannel<T>>,
}

impl<T> Drop for ProducerInner<T> {
    fn drop(&mut self) {
        self.channel.cancel();
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Producer<T> {
    pub fn new(channel: Arc<BoundedChannel<T>>) -> Self {
        Self { inner: Arc::new(ProducerInner { channel }) }
    }

    pub fn append(&self, item: T) -> bool {
        self.inner.channel.append(item)
    }
}
