//! Post-processing handling of source objects.
//!
//! | backup bucket | delete_object | effect                                   |
//! |---------------|---------------|------------------------------------------|
//! | set           | false         | copy to `{prefix}{key}` in backup bucket |
//! | set           | true          | move: copy, then delete source           |
//! | unset         | true          | delete source                            |
//! | unset         | false         | source untouched                         |
//!
//! A local backup directory receives a copy of the staged file in every
//! case. The staged file is removed last, whatever happened before.

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{
    BackupUploadSnafu, DeleteSourceSnafu, DispositionError, LocalBackupSnafu,
};
use crate::notification::ObjectReference;
use crate::staging::StagedFile;
use crate::storage::StoragePoolRef;

/// Applies the configured backup and delete steps to processed objects.
#[derive(Debug, Clone)]
pub struct DispositionManager {
    pool: StoragePoolRef,
    backup: BackupConfig,
    delete_object: bool,
}

impl DispositionManager {
    pub fn new(pool: StoragePoolRef, backup: BackupConfig, delete_object: bool) -> Self {
        Self {
            pool,
            backup,
            delete_object,
        }
    }

    /// Key an object is stored under in the backup bucket.
    pub fn backup_key(&self, key: &str) -> String {
        format!("{}{}", self.backup.prefix, key)
    }

    /// Dispose of a fully processed object and remove its staged copy.
    pub async fn dispose(
        &self,
        reference: &ObjectReference,
        staged: StagedFile,
        last_modified: DateTime<Utc>,
    ) -> Result<(), DispositionError> {
        let result = self.apply(reference, staged.path(), last_modified).await;

        if let Err(e) = staged.remove().await {
            warn!(
                bucket = %reference.bucket,
                key = %reference.key,
                error = %e,
                "Failed to remove staged file"
            );
        }

        result
    }

    async fn apply(
        &self,
        reference: &ObjectReference,
        staged_path: &Path,
        last_modified: DateTime<Utc>,
    ) -> Result<(), DispositionError> {
        if let Some(backup_bucket) = &self.backup.bucket {
            self.upload_backup(reference, staged_path, backup_bucket)
                .await?;
        }

        if let Some(local_dir) = &self.backup.local_dir {
            copy_local(reference, staged_path, local_dir, last_modified).await?;
        }

        if self.delete_object {
            self.delete_source(reference).await?;
        }

        Ok(())
    }

    async fn upload_backup(
        &self,
        reference: &ObjectReference,
        staged_path: &Path,
        backup_bucket: &str,
    ) -> Result<(), DispositionError> {
        let backup_key = self.backup_key(&reference.key);

        let target = self
            .pool
            .get_or_create(backup_bucket)
            .await
            .context(BackupUploadSnafu {
                bucket: backup_bucket,
            })?;
        let bytes = target
            .put_file(&backup_key, staged_path)
            .await
            .context(BackupUploadSnafu {
                bucket: backup_bucket,
            })?;

        info!(
            source = %reference,
            destination = %format!("s3://{backup_bucket}/{backup_key}"),
            bytes,
            moved = self.delete_object,
            "Backed up object"
        );
        Ok(())
    }

    async fn delete_source(&self, reference: &ObjectReference) -> Result<(), DispositionError> {
        let source = self
            .pool
            .get_or_create(&reference.bucket)
            .await
            .context(DeleteSourceSnafu)?;

        match source.delete(&reference.key).await {
            Ok(()) => {
                debug!(object = %reference, "Deleted source object");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(object = %reference, "Source object already gone");
                Ok(())
            }
            Err(e) => Err(e).context(DeleteSourceSnafu),
        }
    }
}

/// Path under `dir` mirroring the `/`-separated segments of `key`.
///
/// Each segment is form-urlencoded. Segments that would not name a plain
/// directory entry are escaped instead of dropped: an empty segment becomes
/// `%2F` and dots become `%2E`. Distinct keys therefore get distinct paths,
/// and none leaves `dir`.
pub fn local_backup_path(dir: &Path, key: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for segment in key.split('/') {
        let encoded: String = url::form_urlencoded::byte_serialize(segment.as_bytes()).collect();
        match encoded.as_str() {
            "" => path.push("%2F"),
            "." | ".." => path.push(encoded.replace('.', "%2E")),
            _ => path.push(encoded),
        }
    }
    path
}

async fn copy_local(
    reference: &ObjectReference,
    staged_path: &Path,
    dir: &Path,
    last_modified: DateTime<Utc>,
) -> Result<(), DispositionError> {
    let target = local_backup_path(dir, &reference.key);
    let target_str = target.display().to_string();

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context(LocalBackupSnafu { path: &target_str })?;
    }
    tokio::fs::copy(staged_path, &target)
        .await
        .context(LocalBackupSnafu { path: &target_str })?;

    // Carry the remote modification time over to the copy.
    let file = std::fs::File::options()
        .write(true)
        .open(&target)
        .context(LocalBackupSnafu { path: &target_str })?;
    file.set_modified(SystemTime::from(last_modified))
        .context(LocalBackupSnafu { path: &target_str })?;

    debug!(object = %reference, path = %target_str, "Copied object to local backup");
    Ok(())
}
