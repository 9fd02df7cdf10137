//! Local staging area for downloaded objects.
//!
//! Each object is staged at `{staging_dir}/{bucket}/{digest}-{basename}`.
//! The digest is the SHA-256 of the bucket and key, so distinct objects never
//! share a file. The basename is the form-urlencoded last key segment, cut
//! from the front to a fixed length so the name stays within filesystem
//! limits and keeps its `.gz` suffix. No key can escape the staging directory.
//!
//! ```text
//! staging_dir/
//! └── logs-bucket/
//!     └── 3f5a...c2e1-E123.2024-01-01-00.abcd.gz
//! ```

use sha2::{Digest, Sha256};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{StagingIoSnafu, StorageError};
use crate::notification::ObjectReference;

/// Root directory holding staged copies.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local path for an object; does not touch the filesystem.
    pub fn path_for(&self, reference: &ObjectReference) -> PathBuf {
        let bucket: String =
            url::form_urlencoded::byte_serialize(reference.bucket.as_bytes()).collect();
        self.root.join(bucket).join(staged_file_name(reference))
    }

    /// Reserve the staging path for `reference`, creating its parent directory.
    pub async fn prepare(&self, reference: &ObjectReference) -> Result<StagedFile, StorageError> {
        let path = self.path_for(reference);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(StagingIoSnafu {
                    path: parent.display().to_string(),
                })?;
        }
        Ok(StagedFile { path: Some(path) })
    }
}

/// Longest basename tail kept in a staged file name.
const MAX_BASENAME_LEN: usize = 96;

fn staged_file_name(reference: &ObjectReference) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference.bucket.as_bytes());
    hasher.update([0u8]);
    hasher.update(reference.key.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let last_segment = reference.key.rsplit('/').next().unwrap_or_default();
    let basename: String = url::form_urlencoded::byte_serialize(last_segment.as_bytes()).collect();
    // The encoded form is ASCII, so any byte offset is a char boundary.
    let tail = &basename[basename.len().saturating_sub(MAX_BASENAME_LEN)..];

    if tail.is_empty() {
        digest
    } else {
        format!("{digest}-{tail}")
    }
}

/// Exclusively owned staging file, removed when dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: Option<PathBuf>,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Remove the file now. A file that is already gone is not an error.
    pub async fn remove(mut self) -> std::io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}
