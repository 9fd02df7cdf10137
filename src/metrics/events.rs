//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the ingestion
//! pipeline. Events implement the `InternalEvent` trait which emits the
//! corresponding Prometheus metric.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Queue events
// ============================================================================

/// Event emitted after a receive call returns.
pub struct MessagesReceived {
    pub count: usize,
}

impl InternalEvent for MessagesReceived {
    fn emit(self) {
        trace!(count = self.count, "Messages received");
        counter!("flurry_messages_received_total").increment(self.count as u64);
    }
}

/// Outcome of the objects carried by a deleted message.
#[derive(Debug, Clone, Copy)]
pub enum DeleteReason {
    /// Every reference completed or was skipped on purpose.
    Clean,
    /// At least one reference failed but the policy deletes anyway.
    WithFailures,
}

impl DeleteReason {
    fn as_str(&self) -> &'static str {
        match self {
            DeleteReason::Clean => "clean",
            DeleteReason::WithFailures => "with_failures",
        }
    }
}

/// Event emitted when a message is deleted from the queue.
pub struct MessageDeleted {
    pub reason: DeleteReason,
}

impl InternalEvent for MessageDeleted {
    fn emit(self) {
        trace!(reason = self.reason.as_str(), "Message deleted");
        counter!("flurry_messages_deleted_total", "reason" => self.reason.as_str()).increment(1);
    }
}

/// Event emitted when a message body cannot be parsed.
pub struct MalformedNotification;

impl InternalEvent for MalformedNotification {
    fn emit(self) {
        trace!("Malformed notification");
        counter!("flurry_malformed_notifications_total").increment(1);
    }
}

/// Event emitted when a receive call fails.
pub struct ReceiveFailed;

impl InternalEvent for ReceiveFailed {
    fn emit(self) {
        trace!("Receive failed");
        counter!("flurry_receive_errors_total").increment(1);
    }
}

// ============================================================================
// Object events
// ============================================================================

/// Final status of a dispatched object.
#[derive(Debug, Clone, Copy)]
pub enum ObjectStatus {
    Success,
    Skipped,
    Incomplete,
    Failed,
}

impl ObjectStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::Success => "success",
            ObjectStatus::Skipped => "skipped",
            ObjectStatus::Incomplete => "incomplete",
            ObjectStatus::Failed => "failed",
        }
    }
}

/// Event emitted when an object reference has been handled.
pub struct ObjectProcessed {
    pub status: ObjectStatus,
}

impl InternalEvent for ObjectProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Object processed");
        counter!("flurry_objects_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Stage at which an object failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Stage,
    Download,
    Decode,
    Checkpoint,
    Disposition,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Stage => "stage",
            FailureStage::Download => "download",
            FailureStage::Decode => "decode",
            FailureStage::Checkpoint => "checkpoint",
            FailureStage::Disposition => "disposition",
        }
    }
}

/// Event emitted when an object fails processing.
pub struct ObjectFailed {
    pub stage: FailureStage,
}

impl InternalEvent for ObjectFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Object failed");
        counter!("flurry_objects_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when records are handed to the sink.
pub struct RecordsEmitted {
    pub count: u64,
}

impl InternalEvent for RecordsEmitted {
    fn emit(self) {
        trace!(count = self.count, "Records emitted");
        counter!("flurry_records_emitted_total").increment(self.count);
    }
}

/// Event emitted when an object download completes.
pub struct ObjectDownloaded {
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for ObjectDownloaded {
    fn emit(self) {
        trace!(
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Object downloaded"
        );
        counter!("flurry_bytes_downloaded_total").increment(self.bytes);
        histogram!("flurry_object_download_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a staged file has been fully decoded.
pub struct FileDecoded {
    pub duration: Duration,
}

impl InternalEvent for FileDecoded {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "File decoded");
        histogram!("flurry_file_decode_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Checkpoint events
// ============================================================================

/// Event emitted when the watermark advances.
pub struct CheckpointAdvanced {
    pub watermark: DateTime<Utc>,
}

impl InternalEvent for CheckpointAdvanced {
    fn emit(self) {
        trace!(watermark = %self.watermark, "Checkpoint advanced");
        gauge!("flurry_checkpoint_watermark_seconds").set(self.watermark.timestamp() as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Head,
    Put,
    PutMultipart,
    Delete,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Head => "head",
            StorageOperation::Put => "put",
            StorageOperation::PutMultipart => "put_multipart",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "flurry_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "flurry_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
