//! In-memory notification queue.
//!
//! Models the parts of SQS semantics the poller depends on: received
//! messages move to an in-flight set until deleted, and can be made visible
//! again with [`InMemoryQueue::expire_in_flight`]. There is no timer; the
//! visibility timeout and wait time are ignored.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{NotificationQueue, QueueMessage, ReceiveOptions};
use crate::error::{DeleteSnafu, QueueError, ReceiveSnafu};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    in_flight: BTreeMap<String, String>,
    deleted: Vec<String>,
    receive_failures: usize,
    next_handle: u64,
}

/// In-memory queue for tests.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a message body.
    pub fn push(&self, body: impl Into<String>) {
        self.state().pending.push_back(body.into());
    }

    /// Make the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.state().receive_failures = count;
    }

    /// Return every in-flight message to the queue, as if its visibility timeout expired.
    pub fn expire_in_flight(&self) {
        let mut state = self.state();
        let expired: Vec<String> = std::mem::take(&mut state.in_flight).into_values().collect();
        state.pending.extend(expired);
    }

    /// Bodies of deleted messages, in deletion order.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }
}

#[async_trait]
impl NotificationQueue for InMemoryQueue {
    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state();
        if state.receive_failures > 0 {
            state.receive_failures -= 1;
            return ReceiveSnafu {
                queue: &self.name,
                message: "injected receive failure",
            }
            .fail();
        }

        let take = (options.max_messages as usize).min(state.pending.len());
        let mut messages = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(body) = state.pending.pop_front() else {
                break;
            };
            state.next_handle += 1;
            let receipt_handle = format!("{}-{:08}", self.name, state.next_handle);
            state
                .in_flight
                .insert(receipt_handle.clone(), body.clone());
            messages.push(QueueMessage {
                receipt_handle,
                body,
            });
        }

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        match state.in_flight.remove(receipt_handle) {
            Some(body) => {
                state.deleted.push(body);
                Ok(())
            }
            None => DeleteSnafu {
                queue: &self.name,
                message: format!("unknown receipt handle {receipt_handle}"),
            }
            .fail(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
