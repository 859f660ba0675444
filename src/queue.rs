//! Blocking FIFO queue shared by producers and workers.
//!
//! The queue carries [`Message`] values. `Message::Shutdown` is the poison
//! pill: it never carries work, and a worker that receives it stops pulling.
//! Closing the queue acts as a broadcast pill: once closed and empty, every
//! `get` returns `Message::Shutdown` instead of blocking.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// An entry in the queue: real work or the shutdown sentinel.
#[derive(Debug, PartialEq, Eq)]
pub enum Message<T> {
    Job(T),
    Shutdown,
}

impl<T> Message<T> {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Message::Shutdown)
    }

    pub fn into_job(self) -> Option<T> {
        match self {
            Message::Job(job) => Some(job),
            Message::Shutdown => None,
        }
    }
}

struct State<T> {
    items: VecDeque<Message<T>>,
    closed: bool,
}

pub struct SynchronizedQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    // mirrors items.len() for lock-free reads; may be stale
    len_hint: AtomicUsize,
}

impl<T> SynchronizedQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(0)
    }

    /// A capacity of 0 means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            len_hint: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        (self.capacity > 0).then_some(self.capacity)
    }

    /// Append a job, blocking while the queue is full.
    pub fn put(&self, item: T) -> Result<()> {
        self.push(Message::Job(item))
    }

    /// Append one poison pill behind whatever is already queued.
    pub fn put_sentinel(&self) -> Result<()> {
        self.push(Message::Shutdown)
    }

    fn push(&self, message: Message<T>) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::ClosedQueue);
            }
            if self.capacity == 0 || state.items.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }

        state.items.push_back(message);
        self.len_hint.store(state.items.len(), Ordering::Relaxed);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head, blocking until something arrives. A closed, empty
    /// queue yields `Message::Shutdown`.
    pub fn get(&self) -> Message<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(message) = self.pop_locked(&mut state) {
                return message;
            }
            if state.closed {
                return Message::Shutdown;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`get`](Self::get) but gives up with `Error::Timeout` after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Message<T>> {
        // a deadline past the end of time is no deadline
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.get());
        };
        let mut state = self.state.lock();
        loop {
            if let Some(message) = self.pop_locked(&mut state) {
                return Ok(message);
            }
            if state.closed {
                return Ok(Message::Shutdown);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                // one last look: a put may have raced the deadline
                return match self.pop_locked(&mut state) {
                    Some(message) => Ok(message),
                    None if state.closed => Ok(Message::Shutdown),
                    None => Err(Error::Timeout),
                };
            }
        }
    }

    fn pop_locked(&self, state: &mut State<T>) -> Option<Message<T>> {
        let message = state.items.pop_front()?;
        self.len_hint.store(state.items.len(), Ordering::Relaxed);
        self.not_full.notify_one();
        Some(message)
    }

    /// Approximate length. Stale the moment it returns.
    pub fn try_size(&self) -> usize {
        self.len_hint.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Refuse further puts. Queued items stay and can still be taken.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Close and remove every queued job, returned in FIFO order.
    /// Queued sentinels are discarded; the closed queue reports shutdown anyway.
    pub fn close_and_take(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.closed = true;
        let taken: Vec<T> = state
            .items
            .drain(..)
            .filter_map(Message::into_job)
            .collect();
        self.len_hint.store(0, Ordering::Relaxed);
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
        taken
    }
}

impl<T> Default for SynchronizedQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> std::fmt::Debug for SynchronizedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedQueue")
            .field("capacity", &self.capacity)
            .field("len_hint", &self.try_size())
            .finish()
    }
}
