//! flurry: a standalone service ingesting S3 log files announced through SQS.
//!
//! Receives object-created notifications, downloads and decodes each object,
//! and writes one JSON record per log line to stdout.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use flurry::config::{Config, DeletionPolicy};
use flurry::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use flurry::metrics;
use flurry::pipeline::run_pipeline;

/// Queue-driven log file ingestion.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries records.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("flurry starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Queue: {}", config.queue.url);
        info!("Deletion policy: {:?}", config.queue.deletion);
        if config.queue.deletion == DeletionPolicy::AfterDispatch {
            info!("  Messages are deleted even when some of their objects fail");
        }
        info!("Staging directory: {}", config.source.staging_dir.display());
        let checkpoint = config.checkpoint.resolve_path().context(ConfigSnafu)?;
        info!("Checkpoint: {}", checkpoint.display());
        if let Some(pattern) = &config.source.exclude_pattern {
            info!("Exclude pattern: {}", pattern);
        }
        match &config.backup.bucket {
            Some(bucket) => info!(
                "Backup bucket: {} (prefix {:?}, {})",
                bucket,
                config.backup.prefix,
                if config.source.delete_object { "move" } else { "copy" }
            ),
            None if config.source.delete_object => info!("Source objects are deleted after processing"),
            None => {}
        }
        if let Some(dir) = &config.backup.local_dir {
            info!("Local backup directory: {}", dir.display());
        }
        info!("Configuration is valid");
        return Ok(());
    }

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline stopped");
    info!("  Messages received: {}", stats.messages_received);
    info!("  Messages deleted: {}", stats.messages_deleted);
    info!("  Malformed messages: {}", stats.malformed_messages);
    info!("  Objects processed: {}", stats.objects_processed);
    info!("  Objects skipped: {}", stats.objects_skipped);
    info!("  Objects failed: {}", stats.objects_failed);
    info!("  Objects incomplete: {}", stats.objects_incomplete);
    info!("  Records emitted: {}", stats.records_emitted);

    Ok(())
}
