//! Integration tests for the flurry pipeline.
//!
//! Each test drives a `Pipeline` with an in-memory queue, in-memory buckets
//! and a channel sink, one poll at a time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use object_store::PutPayload;
use object_store::memory::InMemory;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use flurry::config::Config;
use flurry::pipeline::{IterationResult, Pipeline};
use flurry::queue::InMemoryQueue;
use flurry::record::Record;
use flurry::sink::{ChannelSink, RecordSink};
use flurry::storage::{StoragePool, StoragePoolRef, StorageProviderRef};

const CLOUDFRONT_LOG: &str = "#Version: 1.0\n\
#Fields: date time x-edge-location sc-bytes\n\
2024-01-01\t00:00:01\tFRA2\t512\n\
2024-01-01\t00:00:02\tFRA2\t1024\n";

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Body of an SNS-wrapped S3 event notification.
fn notification(objects: &[(&str, &str)]) -> String {
    let records: Vec<_> = objects
        .iter()
        .map(|(bucket, key)| {
            json!({
                "eventName": "ObjectCreated:Put",
                "s3": {"bucket": {"name": bucket}, "object": {"key": key}}
            })
        })
        .collect();
    json!({
        "Type": "Notification",
        "Message": json!({ "Records": records }).to_string()
    })
    .to_string()
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .map(|entry| entry.unwrap().path())
        .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
        .sum()
}

/// Sink that collects records and cancels a token after `cancel_after` of them.
struct CancellingSink {
    records: Mutex<Vec<Record>>,
    cancel_after: usize,
    token: CancellationToken,
}

impl RecordSink for CancellingSink {
    fn send(&self, record: Record) {
        let mut records = self.records.lock().unwrap();
        records.push(record);
        if records.len() == self.cancel_after {
            self.token.cancel();
        }
    }
}

struct Harness {
    dir: tempfile::TempDir,
    queue: Arc<InMemoryQueue>,
    pool: StoragePoolRef,
    source: StorageProviderRef,
    backup: StorageProviderRef,
    shutdown: CancellationToken,
}

impl Harness {
    async fn new() -> Self {
        let pool = Arc::new(StoragePool::default());
        pool.register("logs", Arc::new(InMemory::new())).await;
        pool.register("archive", Arc::new(InMemory::new())).await;

        Self {
            dir: tempfile::tempdir().unwrap(),
            queue: Arc::new(InMemoryQueue::new("test-queue")),
            source: pool.get_or_create("logs").await.unwrap(),
            backup: pool.get_or_create("archive").await.unwrap(),
            pool,
            shutdown: CancellationToken::new(),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("state").join("checkpoint")
    }

    /// Config with test paths; `extra` is appended as top-level YAML sections.
    fn config(&self, queue_extra: &str, extra: &str) -> Config {
        let yaml = format!(
            r#"
queue:
  url: test-queue
  poll_interval_secs: 1
{queue_extra}
source:
  staging_dir: "{staging}"
{extra}
checkpoint:
  path: "{checkpoint}"
metrics:
  enabled: false
"#,
            staging = self.staging_dir().display(),
            checkpoint = self.checkpoint_path().display(),
        );
        Config::from_yaml(&yaml, false).unwrap()
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> DateTime<Utc> {
        self.source
            .put_payload(key, PutPayload::from(data))
            .await
            .unwrap();
        self.source.head(key).await.unwrap().last_modified
    }

    async fn pipeline_with_sink(&self, config: &Config, sink: Arc<dyn RecordSink>) -> Pipeline {
        Pipeline::new(
            config,
            self.queue.clone(),
            self.pool.clone(),
            sink,
            self.shutdown.clone(),
        )
        .await
        .unwrap()
    }

    async fn pipeline(&self, config: &Config) -> (Pipeline, UnboundedReceiver<Record>) {
        let (sink, rx) = ChannelSink::new();
        (self.pipeline_with_sink(config, Arc::new(sink)).await, rx)
    }
}

fn drain(rx: &mut UnboundedReceiver<Record>) -> Vec<Record> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

mod ingestion_tests {
    use super::*;

    #[tokio::test]
    async fn test_end_to_end_gzip_and_plain() {
        let h = Harness::new().await;
        let t1 = h
            .put("cf/E1.2024-01-01-00.a.gz", gzip(CLOUDFRONT_LOG.as_bytes()))
            .await;
        let t2 = h.put("app/server 1.log", b"plain one\nplain two".to_vec()).await;

        h.queue.push(notification(&[
            ("logs", "cf/E1.2024-01-01-00.a.gz"),
            ("logs", "app/server+1.log"),
        ]));

        let config = h.config("", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;

        assert_eq!(pipeline.poll_once().await, IterationResult::ProcessedMessages);

        let records = drain(&mut rx);
        assert_eq!(records.len(), 4);

        let cloudfront: Vec<_> = records
            .iter()
            .filter(|r| r.key == "cf/E1.2024-01-01-00.a.gz")
            .collect();
        assert_eq!(cloudfront.len(), 2);
        for record in &cloudfront {
            assert_eq!(record.bucket, "logs");
            assert_eq!(record.version.as_deref(), Some("1.0"));
            assert_eq!(
                record.fields.as_deref(),
                Some("date time x-edge-location sc-bytes")
            );
        }
        assert_eq!(cloudfront[0].line, "2024-01-01\t00:00:01\tFRA2\t512");

        let plain: Vec<_> = records
            .iter()
            .filter(|r| r.key == "app/server 1.log")
            .map(|r| (r.line.as_str(), r.version.clone(), r.fields.clone()))
            .collect();
        assert_eq!(
            plain,
            vec![("plain one", None, None), ("plain two", None, None)]
        );

        let stats = pipeline.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_deleted, 1);
        assert_eq!(stats.objects_processed, 2);
        assert_eq!(stats.records_emitted, 4);

        assert_eq!(h.queue.deleted().len(), 1);
        // The checkpoint file stores millisecond precision.
        assert_eq!(
            pipeline.checkpoint().read().await.timestamp_millis(),
            t1.max(t2).timestamp_millis()
        );
        assert_eq!(count_files(&h.staging_dir()), 0);
        // No delete_object, no backup: sources stay.
        assert!(h.source.head("cf/E1.2024-01-01-00.a.gz").await.is_ok());

        assert_eq!(pipeline.poll_once().await, IterationResult::NoMessages);
    }

    #[tokio::test]
    async fn test_long_alb_key_is_processed() {
        let h = Harness::new().await;
        let key = format!(
            "AWSLogs/123456789012/elasticloadbalancing/eu-west-1/2024/01/01/\
             123456789012_elasticloadbalancing_eu-west-1_app.{}_20240101T0000Z_10.0.0.1_{}.log.gz",
            "my-load-balancer".repeat(6),
            "x".repeat(120),
        );
        assert!(key.len() > 250);
        h.put(&key, gzip(b"h2 2024-01-01T00:00:00Z app/lb 1.2.3.4:80\n"))
            .await;
        h.queue.push(notification(&[("logs", &key)]));

        let config = h.config("", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, key);
        assert_eq!(pipeline.stats().objects_failed, 0);
        assert_eq!(pipeline.stats().objects_processed, 1);
        assert_eq!(count_files(&h.staging_dir()), 0);
    }

    #[tokio::test]
    async fn test_move_to_backup_bucket() {
        let h = Harness::new().await;
        h.put("a.log", b"x\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "a.log")]));

        let config = h.config(
            "",
            "  delete_object: true\nbackup:\n  bucket: archive\n  prefix: \"done/\"",
        );
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(h.source.head("a.log").await.unwrap_err().is_not_found());
        assert_eq!(h.backup.get("done/a.log").await.unwrap().as_ref(), b"x\n");
        assert_eq!(count_files(&h.staging_dir()), 0);
    }

    #[tokio::test]
    async fn test_local_backup_directory() {
        let h = Harness::new().await;
        h.put("nested/a.log", b"x\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "nested/a.log")]));

        let local = h.dir.path().join("local-backup");
        let config = h.config(
            "",
            &format!("backup:\n  local_dir: \"{}\"", local.display()),
        );
        let (mut pipeline, _rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        assert_eq!(
            std::fs::read(local.join("nested").join("a.log")).unwrap(),
            b"x\n"
        );
        assert!(h.source.head("nested/a.log").await.is_ok());
    }

    #[tokio::test]
    async fn test_filtered_keys_are_never_fetched() {
        let h = Harness::new().await;
        h.put("keep.log", b"keep\n".to_vec()).await;
        h.put("skip.tmp", b"skip\n".to_vec()).await;
        h.put("done/old.log", b"old\n".to_vec()).await;
        h.queue.push(notification(&[
            ("logs", "keep.log"),
            ("logs", "skip.tmp"),
            ("logs", "done/old.log"),
            ("logs", "folder/"),
        ]));

        let config = h.config(
            "",
            "  exclude_pattern: '\\.tmp$'\nbackup:\n  bucket: logs\n  prefix: \"done/\"",
        );
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        let lines: Vec<_> = drain(&mut rx).into_iter().map(|r| r.line).collect();
        assert_eq!(lines, vec!["keep"]);
        assert_eq!(pipeline.stats().objects_skipped, 3);
        assert_eq!(pipeline.stats().messages_deleted, 1);
    }

    #[tokio::test]
    async fn test_missing_object_is_skipped() {
        let h = Harness::new().await;
        h.queue.push(notification(&[("logs", "gone.log")]));

        let config = h.config("  deletion: on_success", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(pipeline.stats().objects_skipped, 1);
        assert_eq!(h.queue.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped_and_deleted() {
        let h = Harness::new().await;
        h.put("a.log", b"x\n".to_vec()).await;
        h.queue.push("{this is not json");
        h.queue.push(notification(&[("logs", "a.log")]));

        let config = h.config("", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        assert_eq!(pipeline.poll_once().await, IterationResult::ProcessedMessages);

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(pipeline.stats().malformed_messages, 1);
        assert_eq!(pipeline.stats().messages_deleted, 2);
    }

    #[tokio::test]
    async fn test_receive_failure_is_not_fatal() {
        let h = Harness::new().await;
        h.put("a.log", b"x\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "a.log")]));
        h.queue.fail_next_receives(1);

        let config = h.config("", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;

        assert_eq!(pipeline.poll_once().await, IterationResult::ReceiveFailed);
        assert_eq!(pipeline.poll_once().await, IterationResult::ProcessedMessages);
        assert_eq!(drain(&mut rx).len(), 1);
    }
}

mod failure_policy_tests {
    use super::*;

    async fn corrupt_and_good(h: &Harness) {
        h.put("bad.gz", b"not gzip at all\n".to_vec()).await;
        h.put("good.log", b"fine\n".to_vec()).await;
        h.queue
            .push(notification(&[("logs", "bad.gz"), ("logs", "good.log")]));
    }

    #[tokio::test]
    async fn test_on_success_keeps_message_with_failed_object() {
        let h = Harness::new().await;
        corrupt_and_good(&h).await;

        let config = h.config("  deletion: on_success", "  delete_object: true");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        // The good object completes; the corrupt one is neither checkpointed nor disposed.
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(pipeline.stats().objects_failed, 1);
        assert_eq!(pipeline.stats().objects_processed, 1);
        assert!(h.source.head("bad.gz").await.is_ok());
        assert!(h.source.head("good.log").await.unwrap_err().is_not_found());
        assert!(h.queue.deleted().is_empty());
        assert_eq!(h.queue.in_flight_len(), 1);
        assert_eq!(count_files(&h.staging_dir()), 0);
    }

    #[tokio::test]
    async fn test_after_dispatch_deletes_message_with_failed_object() {
        let h = Harness::new().await;
        corrupt_and_good(&h).await;

        let config = h.config("  deletion: after_dispatch", "");
        let (mut pipeline, _rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        assert_eq!(pipeline.stats().objects_failed, 1);
        assert_eq!(h.queue.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_object_does_not_move_checkpoint() {
        let h = Harness::new().await;
        h.put("bad.gz", b"not gzip at all\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "bad.gz")]));

        let config = h.config("", "");
        let (mut pipeline, _rx) = h.pipeline(&config).await;
        pipeline.poll_once().await;

        assert_eq!(pipeline.checkpoint().read().await, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_never_policy_redelivers_with_identical_records() {
        let h = Harness::new().await;
        h.put("cf.gz", gzip(CLOUDFRONT_LOG.as_bytes())).await;
        h.queue.push(notification(&[("logs", "cf.gz")]));

        let config = h.config("  deletion: never", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;

        pipeline.poll_once().await;
        let first = drain(&mut rx);
        assert!(h.queue.deleted().is_empty());

        h.queue.expire_in_flight();
        pipeline.poll_once().await;
        let second = drain(&mut rx);

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }
}

mod watermark_tests {
    use super::*;

    #[tokio::test]
    async fn test_objects_older_than_watermark_are_skipped() {
        let h = Harness::new().await;
        let modified = h.put("old.log", b"old\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "old.log")]));

        let config = h.config("", "  skip_before_checkpoint: true");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline
            .checkpoint()
            .write(modified + ChronoDuration::hours(1))
            .await
            .unwrap();

        pipeline.poll_once().await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(pipeline.stats().objects_skipped, 1);
        assert_eq!(h.queue.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_watermark_is_informational_by_default() {
        let h = Harness::new().await;
        let modified = h.put("old.log", b"old\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "old.log")]));

        let config = h.config("", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        let future = modified + ChronoDuration::hours(1);
        pipeline.checkpoint().write(future).await.unwrap();

        pipeline.poll_once().await;

        assert_eq!(drain(&mut rx).len(), 1);
        // The watermark never moves backwards.
        assert_eq!(
            pipeline.checkpoint().read().await.timestamp_millis(),
            future.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_object_at_watermark_is_processed() {
        let h = Harness::new().await;
        let modified = h.put("same.log", b"same\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "same.log")]));

        let config = h.config("", "  skip_before_checkpoint: true");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        pipeline.checkpoint().write(modified).await.unwrap();

        pipeline.poll_once().await;
        assert_eq!(drain(&mut rx).len(), 1);
    }
}

mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_batch_after_shutdown() {
        let h = Harness::new().await;
        h.queue.push(notification(&[("logs", "a.log")]));

        let config = h.config("", "");
        let (mut pipeline, _rx) = h.pipeline(&config).await;
        h.shutdown.cancel();

        assert_eq!(pipeline.poll_once().await, IterationResult::Shutdown);
        assert_eq!(h.queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_file_leaves_object_untouched() {
        let h = Harness::new().await;
        h.put("five.log", b"l1\nl2\nl3\nl4\nl5\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "five.log")]));

        let config = h.config(
            "",
            "  delete_object: true\nbackup:\n  bucket: archive\n  prefix: \"done/\"",
        );
        let sink = Arc::new(CancellingSink {
            records: Mutex::new(Vec::new()),
            cancel_after: 2,
            token: h.shutdown.clone(),
        });
        let mut pipeline = h.pipeline_with_sink(&config, sink.clone()).await;

        assert_eq!(pipeline.poll_once().await, IterationResult::Shutdown);

        assert_eq!(sink.records.lock().unwrap().len(), 2);
        assert_eq!(pipeline.stats().objects_incomplete, 1);
        assert_eq!(pipeline.stats().objects_processed, 0);
        // No checkpoint, no disposition, no delete.
        assert_eq!(pipeline.checkpoint().read().await, DateTime::UNIX_EPOCH);
        assert!(h.source.head("five.log").await.is_ok());
        assert!(h.backup.head("done/five.log").await.is_err());
        assert!(h.queue.deleted().is_empty());
        assert_eq!(count_files(&h.staging_dir()), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new().await;
        h.put("a.log", b"x\n".to_vec()).await;
        h.queue.push(notification(&[("logs", "a.log")]));

        let config = h.config("", "");
        let (mut pipeline, mut rx) = h.pipeline(&config).await;
        let handle = tokio::spawn(async move { pipeline.run().await });

        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("record should arrive")
            .unwrap();
        assert_eq!(record.line, "x");

        h.shutdown.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pipeline should stop")
            .unwrap()
            .unwrap();

        assert_eq!(stats.objects_processed, 1);
        assert_eq!(stats.records_emitted, 1);
    }
}
