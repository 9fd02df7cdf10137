//! Reading staged log files.
//!
//! - `decoder`: codec detection and lazy line splitting
//! - `metadata`: `#Version:` / `#Fields:` declaration state
//! - `processor`: enrichment and emission of records with cancellation between lines

pub mod decoder;
pub mod metadata;
pub mod processor;

pub use decoder::{CompressionCodec, GzipCodec, LineDecoder, NoopCodec, codec_for_key};
pub use metadata::{Declaration, LineMetadata};
pub use processor::{ProcessOutcome, process_file, process_lines};
