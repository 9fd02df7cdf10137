//! Configuration loading and validation.
//!
//! Configuration is read from a YAML file after environment variable
//! interpolation. Every section other than `queue` is optional.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyQueueSnafu, EnvInterpolationSnafu, InvalidBatchSizeSnafu,
    InvalidExcludePatternSnafu, InvalidVisibilityTimeoutSnafu, InvalidWaitTimeSnafu, NoCheckpointPathSnafu, ReadFileSnafu,
    YamlParseSnafu,
};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// When a queue message is deleted after its objects were dispatched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Delete once every reference has been dispatched, whatever the outcome.
    /// A failed object is then only retried if a new notification arrives.
    #[default]
    AfterDispatch,
    /// Delete only if every reference completed or was skipped on purpose.
    OnSuccess,
    /// Never delete; redelivery is driven by the visibility timeout.
    Never,
}

/// Notification queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue URL (`https://sqs...`) or queue name.
    pub url: String,

    /// AWS region for the queue client. Falls back to the SDK default chain.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint (e.g. LocalStack).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Seconds a received message stays invisible to other consumers (default: 900).
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u32,

    /// Maximum messages per receive call, 1 to 10 (default: 10).
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,

    /// Long-poll wait per receive call, 0 to 20 seconds (default: 20).
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u32,

    /// Seconds to sleep after an empty batch or a receive error (default: 5).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Message deletion policy (default: after_dispatch).
    #[serde(default)]
    pub deletion: DeletionPolicy,
}

/// Longest visibility timeout SQS accepts (12 hours).
const MAX_VISIBILITY_TIMEOUT_SECS: u32 = 43_200;

fn default_visibility_timeout_secs() -> u32 {
    900
}

fn default_max_messages() -> u32 {
    10
}

fn default_wait_time_secs() -> u32 {
    20
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Source object handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Options passed to the S3 client builder (credentials, region, endpoint...).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Keys matching this regex are never fetched.
    #[serde(default)]
    pub exclude_pattern: Option<String>,

    /// Local directory where objects are staged while being processed.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Delete the source object after successful processing.
    #[serde(default)]
    pub delete_object: bool,

    /// Skip objects last modified before the checkpoint watermark.
    #[serde(default)]
    pub skip_before_checkpoint: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            storage_options: HashMap::new(),
            exclude_pattern: None,
            staging_dir: default_staging_dir(),
            delete_object: false,
            skip_before_checkpoint: false,
        }
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("flurry")
}

/// Where processed objects are copied to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Bucket receiving a copy (or the moved object when `delete_object` is set).
    #[serde(default)]
    pub bucket: Option<String>,

    /// Prefix prepended to the key in the backup bucket.
    #[serde(default)]
    pub prefix: String,

    /// Local directory receiving a copy of the staged file.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

/// Checkpoint watermark location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Path of the checkpoint file (default: `$HOME/.flurry/checkpoint`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CheckpointConfig {
    /// Resolve the checkpoint path, defaulting to the user's home directory.
    pub fn resolve_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let home = std::env::var_os("HOME").context(NoCheckpointPathSnafu)?;
        Ok(PathBuf::from(home).join(".flurry").join("checkpoint"))
    }
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            let result = vars::interpolate(content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.queue.url.trim().is_empty(), EmptyQueueSnafu);
        ensure!(
            (1..=10).contains(&self.queue.max_messages),
            InvalidBatchSizeSnafu {
                value: self.queue.max_messages
            }
        );
        ensure!(
            self.queue.wait_time_secs <= 20,
            InvalidWaitTimeSnafu {
                value: self.queue.wait_time_secs
            }
        );
        ensure!(
            self.queue.visibility_timeout_secs <= MAX_VISIBILITY_TIMEOUT_SECS,
            InvalidVisibilityTimeoutSnafu {
                value: self.queue.visibility_timeout_secs
            }
        );
        if let Some(pattern) = &self.source.exclude_pattern {
            regex::Regex::new(pattern).context(InvalidExcludePatternSnafu {
                pattern: pattern.clone(),
            })?;
        }
        Ok(())
    }
}
