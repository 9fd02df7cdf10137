//! Compression detection and line decoding.
//!
//! The codec is chosen from the object key alone: a case-sensitive `.gz`
//! suffix means gzip, anything else is read as plain text. Lines are split on
//! `\n` with one trailing `\r` stripped, and invalid UTF-8 is replaced rather
//! than rejected.

use flate2::read::MultiGzDecoder;
use snafu::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{DecodeError, OpenStagedSnafu, ReadLineSnafu};

/// Trait for compression codecs that wrap a raw byte reader.
pub trait CompressionCodec: Send + Sync {
    /// Wrap `reader` so that it yields decompressed bytes.
    fn wrap<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a>;

    /// Human-readable name of this codec (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// Gzip codec. Concatenated members are read as one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn wrap<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(MultiGzDecoder::new(reader))
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Passthrough codec for uncompressed text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn wrap<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        reader
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

/// Select the codec for an object key.
pub fn codec_for_key(key: &str) -> &'static dyn CompressionCodec {
    if key.ends_with(".gz") {
        &GzipCodec
    } else {
        &NoopCodec
    }
}

/// Lazy, finite sequence of decoded lines.
///
/// Yields at most one `Err`; the sequence ends after it.
pub struct LineDecoder<'a> {
    reader: Box<dyn BufRead + Send + 'a>,
    codec: &'static str,
    key: String,
    line: usize,
    buf: Vec<u8>,
    finished: bool,
}

impl<'a> LineDecoder<'a> {
    /// Decode `reader`, choosing the codec from `key`.
    pub fn new(reader: impl Read + Send + 'a, key: &str) -> Self {
        let codec = codec_for_key(key);
        let decoded = codec.wrap(Box::new(reader));
        Self {
            reader: Box::new(BufReader::new(decoded)),
            codec: codec.name(),
            key: key.to_string(),
            line: 0,
            buf: Vec::new(),
            finished: false,
        }
    }

    pub fn codec(&self) -> &'static str {
        self.codec
    }
}

impl LineDecoder<'static> {
    /// Open a staged file for decoding.
    pub fn open(path: &Path, key: &str) -> Result<Self, DecodeError> {
        let file = File::open(path).context(OpenStagedSnafu {
            path: path.display().to_string(),
        })?;
        Ok(Self::new(file, key))
    }
}

impl Iterator for LineDecoder<'_> {
    type Item = Result<String, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(_) => {
                self.line += 1;
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e).context(ReadLineSnafu {
                    codec: self.codec,
                    key: self.key.clone(),
                    line: self.line + 1,
                }))
            }
        }
    }
}
