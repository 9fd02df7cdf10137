//! AWS SQS backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use snafu::prelude::*;
use tracing::{info, warn};

use super::{NotificationQueue, QueueMessage, ReceiveOptions};
use crate::config::QueueConfig;
use crate::error::{DeleteSnafu, QueueError, ReceiveSnafu, ResolveQueueSnafu};

/// SQS queue client bound to one queue URL.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

/// Whether `queue` is already a queue URL rather than a queue name.
pub fn is_queue_url(queue: &str) -> bool {
    queue.starts_with("https://") || queue.starts_with("http://")
}

impl SqsQueue {
    /// Build a client from the AWS default chain and resolve the queue URL.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        let queue_url = if is_queue_url(&config.url) {
            config.url.clone()
        } else {
            Self::resolve_url(&client, &config.url).await?
        };

        info!(queue_url = %queue_url, "Connected to SQS queue");
        Ok(Self { client, queue_url })
    }

    async fn resolve_url(client: &Client, name: &str) -> Result<String, QueueError> {
        let output = client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| {
                ResolveQueueSnafu {
                    queue: name,
                    message: DisplayErrorContext(&e).to_string(),
                }
                .build()
            })?;

        output.queue_url().map(str::to_string).context(ResolveQueueSnafu {
            queue: name,
            message: "response carried no queue URL",
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl NotificationQueue for SqsQueue {
    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(options.max_messages as i32)
            .visibility_timeout(i32::try_from(options.visibility_timeout_secs).unwrap_or(i32::MAX))
            .wait_time_seconds(options.wait_time_secs as i32)
            .send()
            .await
            .map_err(|e| {
                ReceiveSnafu {
                    queue: &self.queue_url,
                    message: DisplayErrorContext(&e).to_string(),
                }
                .build()
            })?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| {
                let Some(receipt_handle) = message.receipt_handle() else {
                    warn!(
                        message_id = message.message_id().unwrap_or_default(),
                        "Message without receipt handle"
                    );
                    return None;
                };
                Some(QueueMessage {
                    receipt_handle: receipt_handle.to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                })
            })
            .collect();

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| {
                DeleteSnafu {
                    queue: &self.queue_url,
                    message: DisplayErrorContext(&e).to_string(),
                }
                .build()
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.queue_url
    }
}
