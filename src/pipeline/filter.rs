//! Pre-fetch object filtering.

use regex::Regex;
use snafu::prelude::*;

use super::SkipReason;
use crate::config::BackupConfig;
use crate::error::{ConfigError, InvalidExcludePatternSnafu};
use crate::notification::ObjectReference;

/// Decides which referenced objects are never fetched.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    exclude: Option<Regex>,
    /// Backup (bucket, prefix) whose keys must not be re-ingested.
    backup_location: Option<(String, String)>,
}

impl ObjectFilter {
    pub fn new(exclude_pattern: Option<&str>, backup: &BackupConfig) -> Result<Self, ConfigError> {
        let exclude = exclude_pattern
            .map(|pattern| {
                Regex::new(pattern).context(InvalidExcludePatternSnafu {
                    pattern: pattern.to_string(),
                })
            })
            .transpose()?;

        let backup_location = backup
            .bucket
            .as_ref()
            .filter(|_| !backup.prefix.is_empty())
            .map(|bucket| (bucket.clone(), backup.prefix.clone()));

        Ok(Self {
            exclude,
            backup_location,
        })
    }

    /// Reason to skip `reference`, or `None` if it should be processed.
    pub fn check(&self, reference: &ObjectReference) -> Option<SkipReason> {
        if reference.key.is_empty() || reference.key.ends_with('/') {
            return Some(SkipReason::DirectoryMarker);
        }

        if let Some((bucket, prefix)) = &self.backup_location
            && *bucket == reference.bucket
            && reference.key.starts_with(prefix.as_str())
        {
            return Some(SkipReason::BackupCopy);
        }

        if let Some(exclude) = &self.exclude
            && exclude.is_match(&reference.key)
        {
            return Some(SkipReason::Excluded);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup(bucket: Option<&str>, prefix: &str) -> BackupConfig {
        BackupConfig {
            bucket: bucket.map(str::to_string),
            prefix: prefix.to_string(),
            local_dir: None,
        }
    }

    #[test]
    fn test_directory_markers_are_skipped() {
        let filter = ObjectFilter::default();
        assert_eq!(
            filter.check(&ObjectReference::new("logs", "2024/01/")),
            Some(SkipReason::DirectoryMarker)
        );
        assert_eq!(filter.check(&ObjectReference::new("logs", "2024/01/a.gz")), None);
    }

    #[test]
    fn test_exclude_pattern() {
        let filter = ObjectFilter::new(Some(r"\.tmp$|^_"), &BackupConfig::default()).unwrap();

        assert_eq!(
            filter.check(&ObjectReference::new("logs", "a/b.tmp")),
            Some(SkipReason::Excluded)
        );
        assert_eq!(
            filter.check(&ObjectReference::new("logs", "_SUCCESS")),
            Some(SkipReason::Excluded)
        );
        assert_eq!(filter.check(&ObjectReference::new("logs", "a/b.gz")), None);
    }

    #[test]
    fn test_backup_prefix_in_same_bucket() {
        let filter = ObjectFilter::new(None, &backup(Some("logs"), "processed/")).unwrap();

        assert_eq!(
            filter.check(&ObjectReference::new("logs", "processed/a.gz")),
            Some(SkipReason::BackupCopy)
        );
        // Same key in another bucket is a genuine source object.
        assert_eq!(
            filter.check(&ObjectReference::new("other", "processed/a.gz")),
            None
        );
    }

    #[test]
    fn test_empty_backup_prefix_filters_nothing() {
        let filter = ObjectFilter::new(None, &backup(Some("logs"), "")).unwrap();
        assert_eq!(filter.check(&ObjectReference::new("logs", "a.gz")), None);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ObjectFilter::new(Some("("), &BackupConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExcludePattern { .. }));
    }
}
