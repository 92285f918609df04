//! # Thread-Safe Queue
//!
//! A double-ended queue behind a mutex, with a condition variable so a
//! consumer can sleep until an item arrives.
//!
//! This is the hand-off point between a connection's I/O thread, which pushes
//! received messages, and application threads, which pop them. Every
//! operation takes the lock for its whole duration, so callers never observe
//! a half-finished push or pop.
//!
//! ```rust
//! use msgnet::queue::TsQueue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(TsQueue::new());
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || queue.push_back(42))
//! };
//!
//! queue.wait();
//! assert_eq!(queue.pop_front(), Some(42));
//! producer.join().unwrap();
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};

pub struct TsQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Peek at the oldest item. The queue stays locked while the guard lives.
    pub fn front(&self) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.items.lock(), |items| items.front_mut()).ok()
    }

    /// Peek at the newest item. The queue stays locked while the guard lives.
    pub fn back(&self) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.items.lock(), |items| items.back_mut()).ok()
    }

    pub fn push_back(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    pub fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.available.notify_one();
    }

    pub fn pop_front(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.items.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Remove every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Block until the queue holds at least one item.
    ///
    /// Emptiness is re-checked under the lock after every wakeup, so a push
    /// that lands between the check and the sleep is never missed.
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.available.wait(&mut items);
        }
    }

    /// Like [`TsQueue::wait`] but gives up after `timeout`.
    ///
    /// Returns `true` if the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return !items.is_empty();
            }
        }
        true
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TsQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsQueue").field("len", &self.len()).finish()
    }
}
