//! Per-bucket provider cache.
//!
//! Notifications may reference any bucket, so providers are created on first
//! use and shared for the rest of the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use object_store::ObjectStore;

use super::{StorageProvider, StorageProviderRef};
use crate::error::StorageError;

/// Reference-counted handle to a [`StoragePool`].
pub type StoragePoolRef = Arc<StoragePool>;

/// Pool of storage providers keyed by bucket name.
#[derive(Default)]
pub struct StoragePool {
    /// Options applied to every S3 client the pool builds.
    options: HashMap<String, String>,
    providers: RwLock<HashMap<String, StorageProviderRef>>,
}

impl std::fmt::Debug for StoragePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePool").finish_non_exhaustive()
    }
}

impl StoragePool {
    /// Create a pool that builds S3 providers with `options`.
    pub fn new(options: HashMap<String, String>) -> Self {
        Self {
            options,
            providers: RwLock::default(),
        }
    }

    /// Register a pre-built store for `bucket`; later lookups never build an S3 client for it.
    pub async fn register(&self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) {
        let bucket = bucket.into();
        let provider = Arc::new(StorageProvider::with_store(bucket.clone(), store));
        self.providers.write().await.insert(bucket, provider);
    }

    /// Get or create the provider for `bucket`.
    pub async fn get_or_create(&self, bucket: &str) -> Result<StorageProviderRef, StorageError> {
        // Fast path: check if provider already exists
        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(bucket) {
                return Ok(provider.clone());
            }
        }

        let mut providers = self.providers.write().await;
        // Another task may have raced us between the read and write lock.
        if let Some(provider) = providers.get(bucket) {
            return Ok(provider.clone());
        }

        debug!(bucket, "Creating S3 storage provider");
        let provider = Arc::new(StorageProvider::construct_s3(bucket, &self.options)?);
        providers.insert(bucket.to_string(), provider.clone());
        Ok(provider)
    }
}
