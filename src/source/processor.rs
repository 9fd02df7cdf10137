//! Turns a staged file into records.

use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::decoder::LineDecoder;
use super::metadata::{Declaration, LineMetadata};
use crate::emit;
use crate::error::{DecodeError, DecodeTaskSnafu};
use crate::metrics::events::{FileDecoded, RecordsEmitted};
use crate::notification::ObjectReference;
use crate::record::Record;
use crate::sink::RecordSink;

/// How far processing of one file got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every line was decoded and every data line emitted.
    Complete { records: u64 },
    /// Cancellation was observed between lines. The file must be
    /// reprocessed from the first line.
    Incomplete { records: u64 },
}

impl ProcessOutcome {
    pub fn records(&self) -> u64 {
        match self {
            ProcessOutcome::Complete { records } | ProcessOutcome::Incomplete { records } => {
                *records
            }
        }
    }
}

/// Emit one record per data line of `lines`, checking `shutdown` before each line.
///
/// A decode error ends processing; records already emitted stay emitted.
pub fn process_lines<I>(
    lines: I,
    reference: &ObjectReference,
    sink: &dyn RecordSink,
    shutdown: &CancellationToken,
) -> Result<ProcessOutcome, DecodeError>
where
    I: IntoIterator<Item = Result<String, DecodeError>>,
{
    let mut state = LineMetadata::default();
    let mut records = 0u64;

    for line in lines {
        if shutdown.is_cancelled() {
            return Ok(ProcessOutcome::Incomplete { records });
        }
        let line = line?;

        if let Some(declaration) = Declaration::parse(&line) {
            state = state.apply(declaration);
            continue;
        }

        sink.send(Record {
            line,
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            version: state.version().map(str::to_string),
            fields: state.fields().map(str::to_string),
        });
        records += 1;
    }

    Ok(ProcessOutcome::Complete { records })
}

/// Decode the staged file for `reference` on the blocking pool.
pub async fn process_file(
    path: PathBuf,
    reference: ObjectReference,
    sink: Arc<dyn RecordSink>,
    shutdown: CancellationToken,
) -> Result<ProcessOutcome, DecodeError> {
    let start = Instant::now();

    let outcome = tokio::task::spawn_blocking(move || {
        let decoder = LineDecoder::open(&path, &reference.key)?;
        debug!(
            bucket = %reference.bucket,
            key = %reference.key,
            codec = decoder.codec(),
            "Decoding staged file"
        );
        process_lines(decoder, &reference, sink.as_ref(), &shutdown)
    })
    .await
    .context(DecodeTaskSnafu)??;

    emit!(RecordsEmitted {
        count: outcome.records()
    });
    if matches!(outcome, ProcessOutcome::Complete { .. }) {
        emit!(FileDecoded {
            duration: start.elapsed()
        });
    }

    Ok(outcome)
}
