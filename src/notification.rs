//! Queue notification decoding.
//!
//! A message body is a JSON envelope whose `Message` field holds a second,
//! JSON-encoded document with the object-store event records:
//!
//! ```json
//! {"Message": "{\"Records\":[{\"s3\":{\"bucket\":{\"name\":\"logs\"},\"object\":{\"key\":\"a.gz\"}}}]}"}
//! ```

use serde::Deserialize;
use snafu::prelude::*;
use std::fmt;

use crate::error::{EnvelopeSnafu, NotificationError, PayloadSnafu};

/// A (bucket, key) pair identifying one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    pub bucket: String,
    pub key: String,
}

impl ObjectReference {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// One received queue message and the objects it announces.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Opaque handle used to delete the message.
    pub receipt_handle: String,
    pub objects: Vec<ObjectReference>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct EventPayload {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    s3: Option<S3Entity>,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: Option<NamedBucket>,
    object: Option<KeyedObject>,
}

#[derive(Deserialize)]
struct NamedBucket {
    name: Option<String>,
}

#[derive(Deserialize)]
struct KeyedObject {
    key: Option<String>,
}

impl Notification {
    /// Decode a message body.
    ///
    /// Well-formed JSON of any other shape (no `Message`, no `Records`,
    /// records without bucket or key) yields no references. Only invalid JSON
    /// is an error.
    pub fn parse_body(body: &str) -> Result<Vec<ObjectReference>, NotificationError> {
        let envelope: Envelope = match serde_json::from_str(body) {
            Ok(envelope) => envelope,
            Err(e) if e.is_data() => return Ok(Vec::new()),
            Err(e) => return Err(e).context(EnvelopeSnafu),
        };
        let Some(message) = envelope.message else {
            return Ok(Vec::new());
        };

        let payload: EventPayload = match serde_json::from_str(&message) {
            Ok(payload) => payload,
            Err(e) if e.is_data() => return Ok(Vec::new()),
            Err(e) => return Err(e).context(PayloadSnafu),
        };

        Ok(payload
            .records
            .into_iter()
            .filter_map(|record| {
                let s3 = record.s3?;
                let bucket = s3.bucket?.name?;
                let key = s3.object?.key?;
                Some(ObjectReference::new(bucket, decode_key(&key)))
            })
            .collect())
    }
}

/// Decode an event key, which is form-urlencoded (`+` for space, `%XX` escapes).
///
/// Literal `&` and `=` never appear in event keys; they arrive escaped.
pub fn decode_key(raw: &str) -> String {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(name, value)| {
            if value.is_empty() {
                name.into_owned()
            } else {
                format!("{name}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
