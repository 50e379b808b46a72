//! Per-request FIFO mailbox between the upstream socket and a waiting relay task.
//!
//! A [`MessageQueue`] buffers events that arrive before anyone asks for
//! them and hands them over directly when a consumer is already waiting.
//! Closing the queue discards buffered events and fails every current and
//! future `dequeue` with [`QueueError::Closed`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::QueueError;

/// Used when a caller has no stricter bound of its own.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(1_200_000);

#[derive(Debug)]
struct Slots<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
struct Inner<T> {
    slots: Mutex<Slots<T>>,
    notify: Notify,
}

/// Cloning yields another handle to the same queue.
#[derive(Debug)]
pub struct MessageQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Slots {
                    items: VecDeque::new(),
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Append an event. Events pushed after `close` are dropped.
    pub fn enqueue(&self, item: T) {
        {
            let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.closed {
                return;
            }
            slots.items.push_back(item);
        }
        self.inner.notify.notify_one();
    }

    /// Wait up to `timeout` for the oldest event.
    pub async fn dequeue(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so an enqueue between the
            // check and the await is not lost.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
                if slots.closed {
                    return Err(QueueError::Closed);
                }
                if let Some(item) = slots.items.pop_front() {
                    return Ok(item);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Timeout);
            }
        }
    }

    /// Close the queue, discarding buffered events and waking every waiter.
    pub fn close(&self) {
        {
            let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.closed = true;
            slots.items.clear();
        }
        self.inner.notify.notify_waiters();
    }

    /// Drop every buffered event without closing. Returns how many were dropped.
    pub fn discard_buffered(&self) -> usize {
        let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = slots.items.len();
        slots.items.clear();
        dropped
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
