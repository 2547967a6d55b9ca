//! Removes the trailing line ending from each message

use super::Reader;
use crate::types::Message;
use crate::Result;
use async_trait::async_trait;

/// Strips a trailing `\n` or `\r\n`, leaving the raw byte count untouched
pub struct StripNewline<R> {
    reader: R,
}

impl<R: Reader> StripNewline<R> {
    /// Wrap `reader`
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

fn line_ending_len(content: &[u8]) -> usize {
    if content.ends_with(b"\r\n") {
        2
    } else if content.ends_with(b"\n") {
        1
    } else {
        0
    }
}

#[async_trait]
impl<R: Reader> Reader for StripNewline<R> {
    async fn next(&mut self) -> Result<Message> {
        let mut message = self.reader.next().await?;
        let len = message.content.len() - line_ending_len(&message.content);
        message.content.truncate(len);
        Ok(message)
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}
