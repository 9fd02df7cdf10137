//! Chunked object download into a staging file.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use snafu::prelude::*;
use std::path::Path;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::StorageProvider;
use crate::emit;
use crate::error::{ObjectStoreSnafu, StagingIoSnafu, StorageError};
use crate::metrics::events::ObjectDownloaded;

/// Result of a download that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The whole object is on disk.
    Complete {
        last_modified: DateTime<Utc>,
        bytes: u64,
    },
    /// Cancellation was observed between chunks. The destination holds a partial copy.
    Cancelled,
}

/// Stream `key` from `storage` into `destination`, checking `shutdown` between chunks.
///
/// On error the destination may hold a partial copy; removing it is the
/// caller's job.
pub async fn fetch_to_file(
    storage: &StorageProvider,
    key: &str,
    destination: &Path,
    shutdown: &CancellationToken,
) -> Result<FetchOutcome, StorageError> {
    if shutdown.is_cancelled() {
        return Ok(FetchOutcome::Cancelled);
    }

    let start = Instant::now();
    let path_str = destination.display().to_string();
    let body = storage.get_stream(key).await?;

    let mut file = File::create(destination)
        .await
        .context(StagingIoSnafu { path: &path_str })?;

    let Some(written) = write_chunks(
        storage.bucket(),
        key,
        body.stream,
        &mut file,
        &path_str,
        shutdown,
    )
    .await?
    else {
        return Ok(FetchOutcome::Cancelled);
    };

    file.flush()
        .await
        .context(StagingIoSnafu { path: &path_str })?;
    file.sync_all()
        .await
        .context(StagingIoSnafu { path: &path_str })?;

    emit!(ObjectDownloaded {
        bytes: written,
        duration: start.elapsed(),
    });

    Ok(FetchOutcome::Complete {
        last_modified: body.last_modified,
        bytes: written,
    })
}

/// Copy `stream` into `file` until it ends or `shutdown` fires.
///
/// Returns the byte count, or `None` when cancelled between chunks.
async fn write_chunks(
    bucket: &str,
    key: &str,
    mut stream: BoxStream<'_, object_store::Result<Bytes>>,
    file: &mut File,
    path_str: &str,
    shutdown: &CancellationToken,
) -> Result<Option<u64>, StorageError> {
    let mut written: u64 = 0;

    loop {
        let Some(next) = shutdown.run_until_cancelled(stream.next()).await else {
            debug!(bucket, key, written, "Download cancelled");
            return Ok(None);
        };
        let Some(chunk) = next else {
            return Ok(Some(written));
        };
        let chunk = chunk.context(ObjectStoreSnafu { bucket, key })?;

        file.write_all(&chunk)
            .await
            .context(StagingIoSnafu { path: path_str })?;
        written += chunk.len() as u64;
    }
}
