//! Notification queue abstraction.
//!
//! - [`NotificationQueue`]: receive/delete interface the poller drives
//! - [`SqsQueue`]: AWS SQS backend
//! - [`InMemoryQueue`]: in-process queue for tests and local runs
//!
//! Receiving never deletes; a message stays in the queue until
//! [`NotificationQueue::delete`] is called with its receipt handle, and
//! becomes visible again once its visibility timeout expires.

pub mod memory;
pub mod sqs;

pub use memory::InMemoryQueue;
pub use sqs::SqsQueue;

use async_trait::async_trait;

use crate::config::QueueConfig;
use crate::error::QueueError;

/// A received, not yet deleted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Handle required to delete this delivery of the message.
    pub receipt_handle: String,
    pub body: String,
}

/// Parameters of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: u32,
    pub visibility_timeout_secs: u32,
    pub wait_time_secs: u32,
}

impl From<&QueueConfig> for ReceiveOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            visibility_timeout_secs: config.visibility_timeout_secs,
            wait_time_secs: config.wait_time_secs,
        }
    }
}

/// Source of object-created notifications.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Receive up to `options.max_messages` messages. An empty batch is not an error.
    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a received message so it is never redelivered.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Queue identifier for logs.
    fn name(&self) -> &str;
}
