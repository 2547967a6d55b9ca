//! Caps message content size

use super::Reader;
use crate::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;

/// Flag added to messages whose content was cut
pub const TRUNCATED_FLAG: &str = "truncated";

/// Truncates content to `max_bytes`, keeping the raw byte count
pub struct LimitReader<R> {
    reader: R,
    max_bytes: usize,
}

impl<R: Reader> LimitReader<R> {
    /// Wrap `reader`; a limit of zero disables truncation
    pub fn new(reader: R, max_bytes: usize) -> Self {
        Self { reader, max_bytes }
    }

    fn cap(&self, message: &mut Message) {
        if self.max_bytes > 0 && message.content.len() > self.max_bytes {
            message.content.truncate(self.max_bytes);
            message.add_flag(TRUNCATED_FLAG);
        }
    }
}

#[async_trait]
impl<R: Reader> Reader for LimitReader<R> {
    async fn next(&mut self) -> Result<Message> {
        match self.reader.next().await {
            Ok(mut message) => {
                self.cap(&mut message);
                Ok(message)
            }
            Err(Error::Partial { mut partial, source }) => {
                self.cap(&mut partial);
                Err(Error::Partial { partial, source })
            }
            Err(err) => Err(err),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}
