//! Error types for flurry using snafu.
//!
//! Each stage of the ingestion pipeline has its own error enum with context
//! selectors. `PipelineError` aggregates them at the top level.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during object store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Object store operation failed.
    #[snafu(display("Storage operation failed for s3://{bucket}/{key}"))]
    ObjectStore {
        source: object_store::Error,
        bucket: String,
        key: String,
    },

    /// S3 client configuration error.
    #[snafu(display("S3 configuration error for bucket {bucket}"))]
    S3Config {
        source: object_store::Error,
        bucket: String,
    },

    /// Local IO error while staging an object.
    #[snafu(display("IO error writing {path}"))]
    StagingIo {
        source: std::io::Error,
        path: String,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore {
                source: object_store::Error::NotFound { .. },
                ..
            }
        )
    }
}

// ============ Notification Errors ============

/// Why a queue message body could not be decoded.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NotificationError {
    /// The outer envelope is not JSON.
    #[snafu(display("Invalid envelope JSON"))]
    Envelope { source: serde_json::Error },

    /// The `Message` string is not JSON.
    #[snafu(display("Invalid Message payload JSON"))]
    Payload { source: serde_json::Error },
}

// ============ Queue Errors ============

/// Errors raised by the notification queue backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Could not resolve the queue URL from its name.
    #[snafu(display("Failed to resolve queue {queue}: {message}"))]
    ResolveQueue { queue: String, message: String },

    /// ReceiveMessage call failed.
    #[snafu(display("Failed to receive messages from {queue}: {message}"))]
    Receive { queue: String, message: String },

    /// DeleteMessage call failed.
    #[snafu(display("Failed to delete message from {queue}: {message}"))]
    Delete { queue: String, message: String },
}

// ============ Decode Errors ============

/// Errors that can occur while decoding a staged file into lines.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// The staged file could not be opened.
    #[snafu(display("Failed to open staged file {path}"))]
    OpenStaged {
        source: std::io::Error,
        path: String,
    },

    /// Reading or decompressing the stream failed (corrupt gzip, truncated trailer).
    #[snafu(display("Failed to read {codec} stream for {key} at line {line}"))]
    ReadLine {
        source: std::io::Error,
        codec: &'static str,
        key: String,
        line: usize,
    },

    /// The blocking decode task panicked or was aborted.
    #[snafu(display("Decode task failed"))]
    DecodeTask { source: tokio::task::JoinError },
}

// ============ Checkpoint Errors ============

/// Errors that can occur while persisting the checkpoint watermark.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    /// Failed to create the checkpoint directory.
    #[snafu(display("Failed to create checkpoint directory {path}"))]
    CreateCheckpointDir {
        source: std::io::Error,
        path: String,
    },

    /// Failed to write the temporary checkpoint file.
    #[snafu(display("Failed to write checkpoint {path}"))]
    WriteCheckpoint {
        source: std::io::Error,
        path: String,
    },

    /// Failed to atomically replace the checkpoint file.
    #[snafu(display("Failed to replace checkpoint {path}"))]
    RenameCheckpoint {
        source: std::io::Error,
        path: String,
    },
}

// ============ Disposition Errors ============

/// Errors that can occur while backing up or deleting a processed object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DispositionError {
    /// Failed to upload to the backup bucket.
    #[snafu(display("Failed to back up object to bucket {bucket}"))]
    BackupUpload { source: StorageError, bucket: String },

    /// Failed to copy the staged file to the local backup directory.
    #[snafu(display("Failed to copy staged file to {path}"))]
    LocalBackup {
        source: std::io::Error,
        path: String,
    },

    /// Failed to delete the source object.
    #[snafu(display("Failed to delete source object"))]
    DeleteSource { source: StorageError },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Queue identifier is empty.
    #[snafu(display("Queue URL or name cannot be empty"))]
    EmptyQueue,

    /// Batch size outside the range the queue accepts.
    #[snafu(display("queue.max_messages must be between 1 and 10, got {value}"))]
    InvalidBatchSize { value: u32 },

    /// Long-poll wait time outside the range the queue accepts.
    #[snafu(display("queue.wait_time_secs must be between 0 and 20, got {value}"))]
    InvalidWaitTime { value: u32 },

    /// Visibility timeout outside the range the queue accepts.
    #[snafu(display("queue.visibility_timeout_secs must be between 0 and 43200, got {value}"))]
    InvalidVisibilityTimeout { value: u32 },

    /// Exclusion pattern is not a valid regex.
    #[snafu(display("Invalid exclude_pattern {pattern:?}"))]
    InvalidExcludePattern {
        source: regex::Error,
        pattern: String,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// No checkpoint path configured and no home directory to default to.
    #[snafu(display("checkpoint.path is unset and HOME is not available"))]
    NoCheckpointPath,
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Queue error.
    #[snafu(display("Queue error"))]
    Queue { source: QueueError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Failed to create a directory required at startup.
    #[snafu(display("Failed to create directory {path}"))]
    CreateDir {
        source: std::io::Error,
        path: String,
    },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
