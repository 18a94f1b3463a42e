//! Bounded drop-oldest queue for messages awaiting delivery.
//!
//! The transmit path enqueues and the delivery worker dequeues, each from its
//! own task, so the queue sits behind a mutex. A [`Notify`] wakes the worker
//! when a message arrives. Contents are in-memory only and lost on exit.

use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A snapshot addressed to the collector.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub agent_id: String,
    pub snapshot: MetricsSnapshot,
    pub enqueued_at: Instant,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataFrame<'a> {
    agent_id: &'a str,
    #[serde(flatten)]
    snapshot: &'a MetricsSnapshot,
}

impl OutboundMessage {
    pub fn new(agent_id: impl Into<String>, snapshot: MetricsSnapshot) -> Self {
        Self {
            agent_id: agent_id.into(),
            snapshot,
            enqueued_at: Instant::now(),
        }
    }

    /// Wire payload: the snapshot fields with `agentId` alongside.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(DataFrame {
            agent_id: &self.agent_id,
            snapshot: &self.snapshot,
        })?)
    }

    /// Time spent waiting since creation.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Fixed-capacity FIFO that evicts its oldest entry when full.
#[derive(Debug)]
pub struct OutboundBuffer<T = OutboundMessage> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> OutboundBuffer<T> {
    /// Create a buffer holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `message`, returning the oldest entry if it had to be evicted.
    pub fn enqueue(&self, message: T) -> Option<T> {
        let evicted = {
            let mut queue = self.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(message);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Remove the oldest entry.
    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Put a message whose delivery failed back at the head.
    ///
    /// Returns `false`, dropping the message, when newer entries have filled
    /// the buffer in the meantime.
    pub fn restore(&self, message: T) -> bool {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_front(message);
        true
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Resolve once a message has been enqueued since the last wake-up.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
