//! flurry: ingest log files announced through queue notifications.
//!
//! Object-created notifications are received from a queue; each referenced
//! object is downloaded to a local staging file, decompressed when its key
//! ends in `.gz`, split into lines and emitted as one [`Record`] per data
//! line, with `#Version:` / `#Fields:` declarations attached to the lines
//! that follow them. Fully processed objects advance a watermark checkpoint
//! and are then backed up and/or deleted.
//!
//! # Example
//!
//! ```ignore
//! use flurry::{Config, run_pipeline};
//! use flurry::error::{ConfigSnafu, PipelineError};
//! use snafu::ResultExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml").context(ConfigSnafu)?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Emitted {} records", stats.records_emitted);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod disposition;
pub mod error;
pub mod metrics;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod sink;
pub mod source;
pub mod staging;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use notification::{Notification, ObjectReference};
pub use pipeline::{IngestStats, Pipeline, run_pipeline};
pub use record::Record;
pub use storage::{StorageProvider, StorageProviderRef};
