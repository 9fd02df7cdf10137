//! Object store access.
//!
//! A [`StorageProvider`] wraps one bucket's `ObjectStore` and records a
//! metric for every request. Providers are handed out by the
//! [`StoragePool`], which builds S3 clients lazily per bucket.

mod fetch;
mod pool;
mod s3;

pub use fetch::{FetchOutcome, fetch_to_file};
pub use pool::{StoragePool, StoragePoolRef};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload, WriteMultipart};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{ObjectStoreSnafu, StagingIoSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Size of each part in a multipart upload.
const UPLOAD_PART_SIZE: usize = 8 * 1024 * 1024;

/// Bytes read from a local file per write into the upload.
const UPLOAD_READ_SIZE: usize = 1024 * 1024;

/// Parts allowed in flight at once during a multipart upload.
const MAX_CONCURRENT_PARTS: usize = 4;

/// Byte stream of an object body together with its last-modified time.
pub struct ObjectBody {
    pub last_modified: DateTime<Utc>,
    pub stream: BoxStream<'static, object_store::Result<Bytes>>,
}

/// Storage provider bound to a single bucket.
#[derive(Clone)]
pub struct StorageProvider {
    bucket: String,
    object_store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<s3://{}>", self.bucket)
    }
}

impl StorageProvider {
    /// Wrap an existing object store (in-memory stores in tests, custom backends).
    pub fn with_store(bucket: impl Into<String>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            object_store,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn context_for(&self, key: &str) -> ObjectStoreSnafu<String, String> {
        ObjectStoreSnafu {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    /// Fetch object metadata without the body.
    pub async fn head(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(&Path::from(key)).await;
        emit!(StorageRequest {
            operation: StorageOperation::Head,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });
        result.context(self.context_for(key))
    }

    /// Open the object body as a stream of chunks.
    pub async fn get_stream(&self, key: &str) -> Result<ObjectBody, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&Path::from(key)).await;
        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        let result = result.context(self.context_for(key))?;
        Ok(ObjectBody {
            last_modified: result.meta.last_modified,
            stream: result.into_stream(),
        })
    }

    /// Get the full contents of an object.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&Path::from(key)).await;
        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result
            .context(self.context_for(key))?
            .bytes()
            .await
            .context(self.context_for(key))
    }

    /// Put a payload at `key`, replacing any existing object.
    pub async fn put_payload(&self, key: &str, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.put(&Path::from(key), payload).await;
        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(self.context_for(key))?;
        Ok(())
    }

    /// Upload a local file to `key` as a multipart upload, reading it in chunks.
    ///
    /// At most `MAX_CONCURRENT_PARTS` parts are buffered, so memory use does
    /// not grow with the file. A failed upload is aborted. Returns the number
    /// of bytes uploaded.
    pub async fn put_file(&self, key: &str, source: &std::path::Path) -> Result<u64, StorageError> {
        let start = Instant::now();
        let result = self.upload_file(key, source).await;
        emit!(StorageRequest {
            operation: StorageOperation::PutMultipart,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });
        result
    }

    async fn upload_file(&self, key: &str, source: &std::path::Path) -> Result<u64, StorageError> {
        let path_str = source.display().to_string();
        let mut file = tokio::fs::File::open(source)
            .await
            .context(StagingIoSnafu { path: &path_str })?;

        let upload = self
            .object_store
            .put_multipart(&Path::from(key))
            .await
            .context(self.context_for(key))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_PART_SIZE);

        match self.write_parts(key, &path_str, &mut file, &mut writer).await {
            Ok(written) => {
                writer.finish().await.context(self.context_for(key))?;
                debug!(bucket = %self.bucket, key, bytes = written, "Uploaded file");
                Ok(written)
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!(bucket = %self.bucket, key, error = %abort, "Failed to abort upload");
                }
                Err(e)
            }
        }
    }

    async fn write_parts(
        &self,
        key: &str,
        path_str: &str,
        file: &mut tokio::fs::File,
        writer: &mut WriteMultipart,
    ) -> Result<u64, StorageError> {
        let mut buffer = vec![0u8; UPLOAD_READ_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = file
                .read(&mut buffer)
                .await
                .context(StagingIoSnafu { path: path_str })?;
            if n == 0 {
                return Ok(written);
            }
            writer
                .wait_for_capacity(MAX_CONCURRENT_PARTS)
                .await
                .context(self.context_for(key))?;
            writer.write(&buffer[..n]);
            written += n as u64;
        }
    }

    /// Delete the object at `key`.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&Path::from(key)).await;
        emit!(StorageRequest {
            operation: StorageOperation::Delete,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(self.context_for(key))
    }
}
