//! S3 storage backend construction.

use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{S3ConfigSnafu, StorageError};

use super::StorageProvider;

impl StorageProvider {
    /// Build an S3 client for `bucket`.
    ///
    /// Credentials and region come from the environment; `options` are
    /// `AmazonS3ConfigKey` names (e.g. `aws_endpoint`, `aws_region`) applied on top.
    pub(super) fn construct_s3(
        bucket: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_retry(RetryConfig::default());

        for (key, value) in options {
            builder = builder.with_config(
                key.parse().context(S3ConfigSnafu { bucket })?,
                value.clone(),
            );
        }

        let s3_store = builder.build().context(S3ConfigSnafu { bucket })?;
        let object_store: Arc<dyn ObjectStore> = Arc::new(s3_store);

        Ok(Self::with_store(bucket, object_store))
    }
}
