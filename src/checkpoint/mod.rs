//! Watermark checkpoint file.
//!
//! The checkpoint is a single text file holding one RFC 3339 timestamp: the
//! last-modified time of the newest object that was fully processed. Writes
//! go to `{path}.tmp` and are renamed into place, so a reader sees either the
//! old or the new value. A reader that finds the file missing, empty or
//! unparseable falls back to the Unix epoch.

use chrono::{DateTime, SecondsFormat, Utc};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{
    CheckpointError, CreateCheckpointDirSnafu, RenameCheckpointSnafu, WriteCheckpointSnafu,
};
use crate::metrics::events::CheckpointAdvanced;

/// File-backed watermark store. Writes are serialized.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored watermark, or the epoch if there is none.
    pub async fn read(&self) -> DateTime<Utc> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to read checkpoint");
                }
                return DateTime::UNIX_EPOCH;
            }
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return DateTime::UNIX_EPOCH;
        }

        match DateTime::parse_from_rfc3339(trimmed) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unparseable checkpoint"
                );
                DateTime::UNIX_EPOCH
            }
        }
    }

    /// Replace the stored watermark with `ts`.
    pub async fn write(&self, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        self.write_locked(ts).await
    }

    /// Store `ts` if it is newer than the current watermark; returns the watermark in effect.
    pub async fn advance(&self, ts: DateTime<Utc>) -> Result<DateTime<Utc>, CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let current = self.read().await;
        if ts <= current {
            debug!(%current, offered = %ts, "Checkpoint not advanced");
            return Ok(current);
        }

        self.write_locked(ts).await?;
        emit!(CheckpointAdvanced { watermark: ts });
        Ok(ts)
    }

    async fn write_locked(&self, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .context(CreateCheckpointDirSnafu {
                    path: parent.display().to_string(),
                })?;
        }

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        let temp_str = temp_path.display().to_string();

        let content = format!("{}\n", ts.to_rfc3339_opts(SecondsFormat::Millis, true));
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .context(WriteCheckpointSnafu { path: &temp_str })?;
        file.write_all(content.as_bytes())
            .await
            .context(WriteCheckpointSnafu { path: &temp_str })?;
        file.sync_all()
            .await
            .context(WriteCheckpointSnafu { path: &temp_str })?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .context(RenameCheckpointSnafu {
                path: self.path.display().to_string(),
            })?;

        debug!(path = %self.path.display(), watermark = %ts, "Checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_reads_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint"));
        assert_eq!(store.read().await, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_zero_length_file_reads_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        std::fs::write(&path, b"").unwrap();

        let store = CheckpointStore::new(&path);
        assert_eq!(store.read().await, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        std::fs::write(&path, b"2024-01-0").unwrap();

        let store = CheckpointStore::new(&path);
        assert_eq!(store.read().await, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoint");
        let store = CheckpointStore::new(&path);

        store.write(ts(1_700_000_000)).await.unwrap();

        assert_eq!(store.read().await, ts(1_700_000_000));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "2023-11-14T22:13:20.000Z\n");
        assert!(!dir.path().join("nested").join("checkpoint.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_can_move_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint"));

        store.write(ts(200)).await.unwrap();
        store.write(ts(100)).await.unwrap();
        assert_eq!(store.read().await, ts(100));
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint"));

        assert_eq!(store.advance(ts(200)).await.unwrap(), ts(200));
        assert_eq!(store.advance(ts(100)).await.unwrap(), ts(200));
        assert_eq!(store.read().await, ts(200));
        assert_eq!(store.advance(ts(300)).await.unwrap(), ts(300));
    }

    #[tokio::test]
    async fn test_concurrent_advances_keep_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path().join("checkpoint")));

        let handles: Vec<_> = (1..=20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.advance(ts(i * 10)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.read().await, ts(200));
    }

    #[tokio::test]
    async fn test_leftover_temp_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        let store = CheckpointStore::new(&path);
        store.write(ts(500)).await.unwrap();

        // Simulate a crash after the temp file was written but before rename.
        std::fs::write(dir.path().join("checkpoint.tmp"), b"").unwrap();
        assert_eq!(store.read().await, ts(500));

        store.write(ts(600)).await.unwrap();
        assert_eq!(store.read().await, ts(600));
    }
}
