//! Notification-driven ingestion pipeline.
//!
//! One long-running loop receives batches from the queue and, for every
//! object each message references, runs the per-object pipeline:
//!
//! ```text
//! filter -> [watermark check] -> stage -> fetch -> decode/emit -> checkpoint -> dispose
//! ```
//!
//! Objects are processed one at a time. The shutdown token is checked before
//! each receive, between messages, between objects, between downloaded
//! chunks and between decoded lines. An object interrupted by shutdown is
//! reported as incomplete: no checkpoint, no disposition, and its message is
//! left in the queue to be redelivered.

mod filter;
mod signal;

pub use filter::ObjectFilter;
pub use signal::{shutdown_signal, spawn_signal_handler};

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{Config, DeletionPolicy};
use crate::disposition::DispositionManager;
use crate::emit;
use crate::error::{ConfigSnafu, CreateDirSnafu, PipelineError, QueueSnafu};
use crate::metrics::events::{
    DeleteReason, FailureStage, MalformedNotification, MessageDeleted, MessagesReceived,
    ObjectFailed, ObjectProcessed, ObjectStatus, ReceiveFailed,
};
use crate::notification::{Notification, ObjectReference};
use crate::queue::{NotificationQueue, QueueMessage, ReceiveOptions, SqsQueue};
use crate::sink::{RecordSink, StdoutSink};
use crate::source::{ProcessOutcome, process_file};
use crate::staging::StagingArea;
use crate::storage::{FetchOutcome, StoragePool, StoragePoolRef, fetch_to_file};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub messages_received: usize,
    pub messages_deleted: usize,
    pub malformed_messages: usize,
    pub objects_processed: usize,
    pub objects_skipped: usize,
    pub objects_failed: usize,
    pub objects_incomplete: usize,
    pub records_emitted: u64,
}

/// Why an object was not processed. Skips count as handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Key ends in `/`.
    DirectoryMarker,
    /// Key lies under the backup prefix of the backup bucket.
    BackupCopy,
    /// Key matches the exclude pattern.
    Excluded,
    /// Last modified before the checkpoint watermark.
    BeforeCheckpoint,
    /// Object no longer exists.
    NotFound,
}

/// Result of running the per-object pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    Completed { records: u64 },
    Skipped(SkipReason),
    Incomplete,
    Failed(FailureStage),
}

/// Outcomes of all references in one message.
#[derive(Debug, Default)]
struct DispatchSummary {
    completed: usize,
    skipped: usize,
    failed: usize,
    incomplete: usize,
    /// Shutdown stopped dispatch before every reference was attempted.
    interrupted: bool,
}

impl DispatchSummary {
    fn record(&mut self, outcome: ObjectOutcome) {
        match outcome {
            ObjectOutcome::Completed { .. } => self.completed += 1,
            ObjectOutcome::Skipped(_) => self.skipped += 1,
            ObjectOutcome::Incomplete => self.incomplete += 1,
            ObjectOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Whether the message may be deleted under `policy`, and with what outcome label.
    fn deletion(&self, policy: DeletionPolicy) -> Option<DeleteReason> {
        if self.interrupted || self.incomplete > 0 {
            return None;
        }
        match policy {
            DeletionPolicy::Never => None,
            DeletionPolicy::OnSuccess if self.failed > 0 => None,
            DeletionPolicy::OnSuccess => Some(DeleteReason::Clean),
            DeletionPolicy::AfterDispatch if self.failed > 0 => Some(DeleteReason::WithFailures),
            DeletionPolicy::AfterDispatch => Some(DeleteReason::Clean),
        }
    }
}

/// Result of a single poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResult {
    /// A non-empty batch was handled.
    ProcessedMessages,
    /// The queue returned no messages.
    NoMessages,
    /// The receive call failed.
    ReceiveFailed,
    /// Shutdown was requested.
    Shutdown,
}

/// Main ingestion pipeline.
pub struct Pipeline {
    queue: Arc<dyn NotificationQueue>,
    receive: ReceiveOptions,
    deletion: DeletionPolicy,
    poll_interval: Duration,
    filter: ObjectFilter,
    storage: StoragePoolRef,
    staging: StagingArea,
    checkpoint: Arc<CheckpointStore>,
    skip_before_checkpoint: bool,
    disposition: DispositionManager,
    sink: Arc<dyn RecordSink>,
    stats: IngestStats,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Assemble a pipeline around the given queue, storage and sink.
    ///
    /// Creates the staging directory; failing to do so is fatal.
    pub async fn new(
        config: &Config,
        queue: Arc<dyn NotificationQueue>,
        storage: StoragePoolRef,
        sink: Arc<dyn RecordSink>,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let filter = ObjectFilter::new(config.source.exclude_pattern.as_deref(), &config.backup)
            .context(ConfigSnafu)?;
        let checkpoint_path = config.checkpoint.resolve_path().context(ConfigSnafu)?;

        let staging_dir = &config.source.staging_dir;
        tokio::fs::create_dir_all(staging_dir)
            .await
            .context(CreateDirSnafu {
                path: staging_dir.display().to_string(),
            })?;
        if let Some(local_dir) = &config.backup.local_dir {
            tokio::fs::create_dir_all(local_dir)
                .await
                .context(CreateDirSnafu {
                    path: local_dir.display().to_string(),
                })?;
        }

        info!(
            queue = queue.name(),
            staging_dir = %staging_dir.display(),
            checkpoint = %checkpoint_path.display(),
            deletion = ?config.queue.deletion,
            "Pipeline initialized"
        );

        Ok(Self {
            receive: ReceiveOptions::from(&config.queue),
            deletion: config.queue.deletion,
            poll_interval: config.queue.poll_interval(),
            filter,
            staging: StagingArea::new(staging_dir),
            checkpoint: Arc::new(CheckpointStore::new(checkpoint_path)),
            skip_before_checkpoint: config.source.skip_before_checkpoint,
            disposition: DispositionManager::new(
                storage.clone(),
                config.backup.clone(),
                config.source.delete_object,
            ),
            queue,
            storage,
            sink,
            stats: IngestStats::default(),
            shutdown,
        })
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Poll until shutdown is requested.
    ///
    /// Sleeps for the poll interval only after an empty batch or a failed
    /// receive; a non-empty batch is followed immediately by the next receive.
    pub async fn run(&mut self) -> Result<IngestStats, PipelineError> {
        info!(queue = self.queue.name(), "Starting pipeline");

        loop {
            let result = self.poll_once().await;

            match result {
                IterationResult::Shutdown => break,
                IterationResult::ProcessedMessages => continue,
                IterationResult::NoMessages => {
                    debug!(
                        "No messages, waiting {}s before next poll",
                        self.poll_interval.as_secs()
                    );
                }
                IterationResult::ReceiveFailed => {
                    info!(
                        "Receive failed, waiting {}s before retrying",
                        self.poll_interval.as_secs()
                    );
                }
            }

            // Wait for poll interval or shutdown
            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(self.poll_interval))
                .await
                .is_none()
            {
                info!("Shutdown requested during poll wait");
                break;
            }
        }

        info!("Pipeline stopped: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Receive one batch and handle every message in it.
    pub async fn poll_once(&mut self) -> IterationResult {
        if self.shutdown.is_cancelled() {
            return IterationResult::Shutdown;
        }

        // Race the receive (which may long-poll) against shutdown
        let shutdown = self.shutdown.clone();
        let received = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutdown requested during receive");
                return IterationResult::Shutdown;
            }

            result = self.queue.receive(self.receive) => result,
        };

        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Failed to receive messages");
                emit!(ReceiveFailed);
                return IterationResult::ReceiveFailed;
            }
        };

        emit!(MessagesReceived {
            count: messages.len()
        });
        if messages.is_empty() {
            return IterationResult::NoMessages;
        }

        self.stats.messages_received += messages.len();
        debug!(count = messages.len(), "Received messages");

        for message in messages {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, leaving remaining messages for redelivery");
                return IterationResult::Shutdown;
            }
            self.handle_message(message).await;
        }

        if self.shutdown.is_cancelled() {
            IterationResult::Shutdown
        } else {
            IterationResult::ProcessedMessages
        }
    }

    /// Dispatch every reference in one message, then delete it if the policy allows.
    async fn handle_message(&mut self, message: QueueMessage) {
        let objects = match Notification::parse_body(&message.body) {
            Ok(objects) => objects,
            Err(e) => {
                warn!(
                    error = %snafu::Report::from_error(&e),
                    "Skipping malformed notification"
                );
                emit!(MalformedNotification);
                self.stats.malformed_messages += 1;
                Vec::new()
            }
        };
        let notification = Notification {
            receipt_handle: message.receipt_handle,
            objects,
        };

        let mut summary = DispatchSummary::default();
        for reference in &notification.objects {
            if self.shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            let outcome = self.process_object(reference).await;
            self.record_outcome(reference, outcome);
            summary.record(outcome);
        }

        self.settle(&notification, &summary).await;
    }

    async fn settle(&mut self, notification: &Notification, summary: &DispatchSummary) {
        let Some(reason) = summary.deletion(self.deletion) else {
            debug!(
                objects = notification.objects.len(),
                completed = summary.completed,
                skipped = summary.skipped,
                failed = summary.failed,
                incomplete = summary.incomplete,
                interrupted = summary.interrupted,
                "Leaving message in queue"
            );
            return;
        };

        if matches!(reason, DeleteReason::WithFailures) {
            warn!(
                failed = summary.failed,
                objects = notification.objects.len(),
                "Deleting message although some objects failed; they will not be retried"
            );
        }

        match self.queue.delete(&notification.receipt_handle).await {
            Ok(()) => {
                emit!(MessageDeleted { reason });
                self.stats.messages_deleted += 1;
            }
            Err(e) => {
                error!(error = %e, "Failed to delete message; it will be redelivered");
            }
        }
    }

    fn record_outcome(&mut self, reference: &ObjectReference, outcome: ObjectOutcome) {
        match outcome {
            ObjectOutcome::Completed { records } => {
                self.stats.objects_processed += 1;
                self.stats.records_emitted += records;
                emit!(ObjectProcessed {
                    status: ObjectStatus::Success
                });
                info!(object = %reference, records, "Processed object");
            }
            ObjectOutcome::Skipped(reason) => {
                self.stats.objects_skipped += 1;
                emit!(ObjectProcessed {
                    status: ObjectStatus::Skipped
                });
                debug!(object = %reference, ?reason, "Skipped object");
            }
            ObjectOutcome::Incomplete => {
                self.stats.objects_incomplete += 1;
                emit!(ObjectProcessed {
                    status: ObjectStatus::Incomplete
                });
                info!(object = %reference, "Object processing interrupted by shutdown");
            }
            ObjectOutcome::Failed(stage) => {
                self.stats.objects_failed += 1;
                emit!(ObjectProcessed {
                    status: ObjectStatus::Failed
                });
                emit!(ObjectFailed { stage });
            }
        }
    }

    /// Run the per-object pipeline for one reference.
    pub async fn process_object(&self, reference: &ObjectReference) -> ObjectOutcome {
        if let Some(reason) = self.filter.check(reference) {
            return ObjectOutcome::Skipped(reason);
        }

        let storage = match self.storage.get_or_create(&reference.bucket).await {
            Ok(storage) => storage,
            Err(e) => return failed(reference, FailureStage::Download, &e),
        };

        if self.skip_before_checkpoint {
            let watermark = self.checkpoint.read().await;
            match storage.head(&reference.key).await {
                Ok(meta) if meta.last_modified < watermark => {
                    return ObjectOutcome::Skipped(SkipReason::BeforeCheckpoint);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => return ObjectOutcome::Skipped(SkipReason::NotFound),
                Err(e) => return failed(reference, FailureStage::Download, &e),
            }
        }

        let staged = match self.staging.prepare(reference).await {
            Ok(staged) => staged,
            Err(e) => return failed(reference, FailureStage::Stage, &e),
        };

        let last_modified =
            match fetch_to_file(&storage, &reference.key, staged.path(), &self.shutdown).await {
                Ok(FetchOutcome::Complete {
                    last_modified,
                    bytes,
                }) => {
                    debug!(object = %reference, bytes, %last_modified, "Fetched object");
                    last_modified
                }
                Ok(FetchOutcome::Cancelled) => return ObjectOutcome::Incomplete,
                Err(e) if e.is_not_found() => return ObjectOutcome::Skipped(SkipReason::NotFound),
                Err(e) => return failed(reference, FailureStage::Download, &e),
            };

        let processed = process_file(
            staged.path().to_path_buf(),
            reference.clone(),
            self.sink.clone(),
            self.shutdown.clone(),
        )
        .await;
        let records = match processed {
            Ok(ProcessOutcome::Complete { records }) => records,
            Ok(ProcessOutcome::Incomplete { .. }) => return ObjectOutcome::Incomplete,
            Err(e) => return failed(reference, FailureStage::Decode, &e),
        };

        if let Err(e) = self.checkpoint.advance(last_modified).await {
            return failed(reference, FailureStage::Checkpoint, &e);
        }

        if let Err(e) = self
            .disposition
            .dispose(reference, staged, last_modified)
            .await
        {
            return failed(reference, FailureStage::Disposition, &e);
        }

        ObjectOutcome::Completed { records }
    }
}

fn failed(
    reference: &ObjectReference,
    stage: FailureStage,
    error: &dyn std::error::Error,
) -> ObjectOutcome {
    warn!(
        bucket = %reference.bucket,
        key = %reference.key,
        stage = stage.as_str(),
        error = %snafu::Report::from_error(error),
        "Object failed"
    );
    ObjectOutcome::Failed(stage)
}

/// Run the pipeline against SQS and S3 with records written to stdout.
pub async fn run_pipeline(config: Config) -> Result<IngestStats, PipelineError> {
    let shutdown = CancellationToken::new();

    // Set up signal handler for graceful shutdown
    spawn_signal_handler(shutdown.clone());

    let queue = SqsQueue::connect(&config.queue)
        .await
        .context(QueueSnafu)?;
    let storage = Arc::new(StoragePool::new(config.source.storage_options.clone()));

    let mut pipeline = Pipeline::new(
        &config,
        Arc::new(queue),
        storage,
        Arc::new(StdoutSink),
        shutdown,
    )
    .await?;
    pipeline.run().await
}
