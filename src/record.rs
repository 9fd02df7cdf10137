//! Emitted record type.

use serde::Serialize;

/// One decoded data line with its origin and the declarations in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub line: String,
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
}
