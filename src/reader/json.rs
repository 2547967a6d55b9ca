//! Decodes JSON-encoded lines into structured fields

use super::Reader;
use crate::config::JsonConfig;
use crate::types::{Fields, Message};
use crate::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::{json, Value};
use tracing::debug;

/// Field that holds decoded keys unless `keys_under_root` is set
pub const JSON_KEY: &str = "json";

/// Field receiving decoding errors when `add_error_key` is set
pub const ERROR_KEY: &str = "error";

/// Parses every line as a JSON object
pub struct JsonReader<R> {
    reader: R,
    config: JsonConfig,
}

impl<R: Reader> JsonReader<R> {
    /// Wrap `reader`
    pub fn new(reader: R, config: JsonConfig) -> Self {
        Self { reader, config }
    }

    /// Decode `content`, returning the replacement content (if any) and the decoded fields
    fn decode(&self, content: &[u8]) -> (Option<BytesMut>, Fields) {
        let mut fields: Fields = match serde_json::from_slice(content) {
            Ok(fields) => fields,
            Err(err) => {
                debug!(error = %err, "failed to decode JSON line");
                let mut fields = Fields::new();
                self.add_error(&mut fields, format!("Error decoding JSON: {}", err));
                return (None, fields);
            }
        };

        if self.config.message_key.is_empty() {
            return (Some(BytesMut::new()), fields);
        }

        match fields.remove(&self.config.message_key) {
            Some(Value::String(text)) => (Some(BytesMut::from(text.as_bytes())), fields),
            other => {
                if let Some(value) = other {
                    fields.insert(self.config.message_key.clone(), value);
                }
                let reason = format!("Key '{}' not found or not a string", self.config.message_key);
                self.add_error(&mut fields, reason);
                (Some(BytesMut::new()), fields)
            }
        }
    }

    fn add_error(&self, fields: &mut Fields, message: String) {
        if self.config.add_error_key {
            fields.insert(ERROR_KEY.to_string(), json!({ "message": message, "type": "json" }));
        }
    }

    fn merge(&self, message: &mut Message, decoded: Fields) {
        if !self.config.keys_under_root {
            if !decoded.is_empty() {
                message.fields.insert(JSON_KEY.to_string(), Value::Object(decoded));
            }
            return;
        }

        for (key, value) in decoded {
            if self.config.overwrite_keys || !message.fields.contains_key(&key) {
                message.fields.insert(key, value);
            }
        }
    }
}

#[async_trait]
impl<R: Reader> Reader for JsonReader<R> {
    async fn next(&mut self) -> Result<Message> {
        let mut message = self.reader.next().await?;

        let (content, decoded) = self.decode(&message.content);
        if let Some(content) = content {
            message.content = content;
        }
        self.merge(&mut message, decoded);

        Ok(message)
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}
