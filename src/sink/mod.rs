//! Downstream record sinks.
//!
//! The pipeline hands every [`Record`] to a [`RecordSink`]. Sinks take
//! ownership of the record and return nothing; backpressure is the sink's
//! concern.

use std::io::Write;
use tokio::sync::mpsc;
use tracing::warn;

use crate::record::Record;

/// Receives emitted records.
pub trait RecordSink: Send + Sync {
    fn send(&self, record: Record);
}

/// Writes each record to stdout as one JSON line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn send(&self, record: Record) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(bucket = %record.bucket, key = %record.key, error = %e, "Failed to encode record");
                return;
            }
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            warn!(error = %e, "Failed to write record to stdout");
        }
    }
}

/// Forwards records into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Record>,
}

impl ChannelSink {
    /// Create a sink and the receiver its records arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Record>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RecordSink for ChannelSink {
    fn send(&self, record: Record) {
        // A dropped receiver means nobody consumes records anymore.
        let _ = self.tx.send(record);
    }
}
