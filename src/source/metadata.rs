//! Per-file declaration tracking.
//!
//! W3C-style logs (CloudFront, IIS) open with `#Version:` and `#Fields:`
//! lines describing the data lines that follow. The state is threaded through
//! a file's lines as an accumulator and dropped when the file ends.

const VERSION_MARKER: &str = "#Version: ";
const FIELDS_MARKER: &str = "#Fields: ";

/// A recognized declaration line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration<'a> {
    Version(&'a str),
    Fields(&'a str),
}

impl<'a> Declaration<'a> {
    /// Recognize a declaration by literal prefix at the very start of the line.
    ///
    /// Only trailing whitespace is stripped from the value; an indented
    /// marker is ordinary data.
    pub fn parse(line: &'a str) -> Option<Self> {
        if let Some(value) = line.strip_prefix(VERSION_MARKER) {
            Some(Declaration::Version(value.trim_end()))
        } else {
            line.strip_prefix(FIELDS_MARKER)
                .map(|value| Declaration::Fields(value.trim_end()))
        }
    }
}

/// Declarations seen so far in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LineMetadata {
    #[default]
    NoMetadata,
    HaveVersion(String),
    HaveFields(String),
    HaveBoth { version: String, fields: String },
}

impl LineMetadata {
    /// Apply a declaration; a repeated declaration replaces the earlier value.
    pub fn apply(self, declaration: Declaration<'_>) -> Self {
        use LineMetadata::*;

        match (self, declaration) {
            (NoMetadata | HaveVersion(_), Declaration::Version(v)) => HaveVersion(v.to_string()),
            (HaveFields(fields) | HaveBoth { fields, .. }, Declaration::Version(v)) => HaveBoth {
                version: v.to_string(),
                fields,
            },
            (NoMetadata | HaveFields(_), Declaration::Fields(f)) => HaveFields(f.to_string()),
            (HaveVersion(version) | HaveBoth { version, .. }, Declaration::Fields(f)) => HaveBoth {
                version,
                fields: f.to_string(),
            },
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            LineMetadata::HaveVersion(version) | LineMetadata::HaveBoth { version, .. } => {
                Some(version)
            }
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&str> {
        match self {
            LineMetadata::HaveFields(fields) | LineMetadata::HaveBoth { fields, .. } => {
                Some(fields)
            }
            _ => None,
        }
    }
}
