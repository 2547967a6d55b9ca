//! The unit passed between reader stages

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Type alias for structured message fields
pub type Fields = Map<String, Value>;

/// Key holding processing markers such as `truncated` or `multiline`
pub const FLAGS_KEY: &str = "log.flags";

/// A message produced by a reader stage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    /// Time the message was produced by the line reader
    pub ts: DateTime<Utc>,

    /// Decoded content, rewritten by each stage
    #[serde(serialize_with = "serialize_content")]
    pub content: BytesMut,

    /// Number of raw source bytes consumed to produce this message
    pub bytes: usize,

    /// Structured fields attached by the stages
    pub fields: Fields,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(content: impl Into<BytesMut>, bytes: usize) -> Self {
        Self {
            ts: Utc::now(),
            content: content.into(),
            bytes,
            fields: Fields::new(),
        }
    }

    /// Returns true if no raw bytes stand behind this message
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Content as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Merge fields into this message, later values win
    pub fn add_fields(&mut self, fields: &Fields) {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Record a processing marker under `log.flags`, once
    pub fn add_flag(&mut self, flag: &str) {
        let entry = self
            .fields
            .entry(FLAGS_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));

        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(flags) = entry {
            if !flags.iter().any(|f| f == flag) {
                flags.push(Value::String(flag.to_string()));
            }
        }
    }

    /// Returns true if `flag` was recorded under `log.flags`
    pub fn has_flag(&self, flag: &str) -> bool {
        self.fields
            .get(FLAGS_KEY)
            .and_then(Value::as_array)
            .is_some_and(|flags| flags.iter().any(|f| f == flag))
    }
}

fn serialize_content<S: serde::Serializer>(content: &BytesMut, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(content))
}
