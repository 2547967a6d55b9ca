//! Line reader
//!
//! Splits the raw byte stream on the encoded newline sequence and decodes each
//! line to UTF-8, counting the raw bytes behind every line.
//!
//! A line longer than the configured limit keeps its first decoded bytes; the
//! rest is read and counted but not held in memory.

use super::tail::TailReader;
use super::Reader;
use crate::encoding::{Codec, Decoder};
use crate::types::Message;
use crate::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Produces one newline-terminated line per call
pub struct LineReader {
    reader: TailReader,
    decoder: Decoder,
    newline: Vec<u8>,
    buffer_size: usize,
    max_line_bytes: usize,

    /// Raw bytes not yet returned as part of a line
    raw: Vec<u8>,
    /// Position in `raw` where the next newline search starts
    scan_from: usize,
    /// Prefix of `raw` already fed to the decoder
    decoded: usize,
    /// Raw bytes of the current line already dropped from `raw`
    drained: usize,
    /// Decoded bytes of the line being assembled
    line: Vec<u8>,
    /// The current line went over `max_line_bytes`
    truncated: bool,
}

impl LineReader {
    /// Read lines from `reader`, decoding with `codec`. Lines keep at most
    /// `max_line_bytes` decoded bytes, 0 for no limit.
    pub fn new(reader: TailReader, codec: &Codec, buffer_size: usize, max_line_bytes: usize) -> Self {
        Self {
            reader,
            decoder: codec.decoder(),
            newline: codec.newline().to_vec(),
            buffer_size: buffer_size.max(1),
            max_line_bytes: if max_line_bytes == 0 { usize::MAX } else { max_line_bytes },
            raw: Vec::with_capacity(buffer_size),
            scan_from: 0,
            decoded: 0,
            drained: 0,
            line: Vec::new(),
            truncated: false,
        }
    }

    /// Raw bytes pulled from the source so far
    pub fn offset(&self) -> u64 {
        self.reader.offset()
    }

    /// Next decoded line, including its newline, and the raw bytes it spans.
    ///
    /// State is kept across errors, so a failing read never loses bytes already
    /// pulled from the source.
    pub async fn next_line(&mut self) -> Result<(Vec<u8>, usize)> {
        loop {
            let at = self.advance().await?;
            let end = (at + self.newline.len()).max(self.decoded);

            if self.decode_to(end) {
                break;
            }
            debug!(source = self.reader.name(), "newline sequence did not decode to a line end");
            self.scan_from = at + 1;
        }

        let mut line = std::mem::take(&mut self.line);
        if self.truncated && line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        let consumed = self.drained + self.decoded;
        self.raw.drain(..self.decoded);
        self.decoded = 0;
        self.drained = 0;
        self.scan_from = 0;
        self.truncated = false;

        Ok((line, consumed))
    }

    /// Position of the next newline sequence in `raw`, reading more as needed
    async fn advance(&mut self) -> Result<usize> {
        loop {
            if let Some(at) = find(&self.raw[self.scan_from..], &self.newline) {
                return Ok(self.scan_from + at);
            }

            // A newline split across reads must still be found next time round
            let safe = (self.raw.len() + 1).saturating_sub(self.newline.len());
            self.scan_from = self.scan_from.max(safe);

            if self.raw.len() > self.max_line_bytes {
                self.spill();
            }

            let start = self.raw.len();
            self.raw.resize(start + self.buffer_size, 0);
            let read = self.reader.read(&mut self.raw[start..]).await;
            let n = read.as_ref().map_or(0, |n| *n);
            self.raw.truncate(start + n);
            read?;
        }
    }

    /// Decode and drop the part of `raw` that cannot hold a newline
    fn spill(&mut self) {
        let end = self.scan_from.max(self.decoded);
        self.decode_to(end);

        self.raw.drain(..end);
        self.drained += end;
        self.scan_from = 0;
        self.decoded = 0;
    }

    /// Feed `raw[decoded..end]` to the decoder. Returns true if the decoded
    /// text ends the line.
    fn decode_to(&mut self, end: usize) -> bool {
        let before = self.line.len();
        self.decoder.decode(&self.raw[self.decoded..end], &mut self.line);
        self.decoded = end;
        let ends_line = self.line.len() > before && self.line.last() == Some(&b'\n');

        if self.line.len() > self.max_line_bytes {
            if !self.truncated {
                warn!(
                    source = self.reader.name(),
                    limit = self.max_line_bytes,
                    "line exceeds limit, skipping the rest of it"
                );
                self.truncated = true;
            }
            let cut = char_boundary(&self.line, self.max_line_bytes);
            self.line.truncate(cut);
        }
        ends_line
    }
}

/// Largest UTF-8 character boundary not after `at`
fn char_boundary(text: &[u8], at: usize) -> usize {
    let mut at = at.min(text.len());
    while at > 0 && at < text.len() && (text[at] & 0xC0) == 0x80 {
        at -= 1;
    }
    at
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[async_trait]
impl Reader for LineReader {
    async fn next(&mut self) -> Result<Message> {
        let (line, bytes) = self.next_line().await?;
        Ok(Message::new(&line[..], bytes))
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TailConfig;
    use crate::encoding::{find_encoding, Factory};
    use crate::source::StreamSource;
    use crate::Error;
    use std::io::Cursor;
    use tokio_util::sync::CancellationToken;

    fn codec(name: &str) -> Codec {
        match find_encoding(name).unwrap() {
            Factory::Plain => Codec::plain(),
            Factory::Charset(enc) => Codec::new(Some(enc)),
            Factory::Utf16Bom(_) => unreachable!("bom variants need a source"),
        }
    }

    fn reader(raw: Vec<u8>, codec: &Codec, buffer_size: usize) -> LineReader {
        reader_with_limit(raw, codec, buffer_size, 0)
    }

    fn reader_with_limit(raw: Vec<u8>, codec: &Codec, buffer_size: usize, limit: usize) -> LineReader {
        let source = StreamSource::new("mem", Cursor::new(raw));
        let tail = TailReader::new(Box::new(source), TailConfig::default(), 0, CancellationToken::new());
        LineReader::new(tail, codec, buffer_size, limit)
    }

    async fn collect(reader: &mut LineReader) -> Vec<(String, usize)> {
        let mut lines = Vec::new();
        loop {
            match reader.next_line().await {
                Ok((line, bytes)) => lines.push((String::from_utf8(line).unwrap(), bytes)),
                Err(Error::Eof) => return lines,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }

    #[tokio::test]
    async fn test_plain_lines() {
        let codec = Codec::plain();
        let mut reader = reader(b"first\nsecond\r\n\nthird".to_vec(), &codec, 4);

        let lines = collect(&mut reader).await;
        assert_eq!(
            lines,
            vec![
                ("first\n".to_string(), 6),
                ("second\r\n".to_string(), 8),
                ("\n".to_string(), 1),
            ]
        );
        // the unterminated tail was read but not emitted
        assert_eq!(reader.offset(), 20);
    }

    #[tokio::test]
    async fn test_bytes_sum_to_offset() {
        let text = "αβγ line one\nzwei\n三 drei\n";
        for name in ["utf-8", "utf-16le", "utf-16be", "gbk"] {
            let codec = codec(name);
            let raw = codec.encode(text);
            for buffer_size in [1, 3, 7, 1024] {
                let mut reader = reader(raw.clone(), &codec, buffer_size);
                let lines = collect(&mut reader).await;

                let joined: String = lines.iter().map(|(l, _)| l.as_str()).collect();
                let total: usize = lines.iter().map(|(_, b)| b).sum();
                assert_eq!(joined, text, "{} with buffer {}", name, buffer_size);
                assert_eq!(total, raw.len(), "{} with buffer {}", name, buffer_size);
            }
        }
    }

    #[tokio::test]
    async fn test_utf16_misaligned_newline_bytes() {
        // U+0A0A encodes as 0x0A 0x0A, which contains the LE newline at odd offsets
        let codec = codec("utf-16le");
        let text = "\u{0A0A}\u{0A00}x\n";
        let raw = codec.encode(text);

        let mut reader = reader(raw.clone(), &codec, 2);
        let (line, bytes) = reader.next_line().await.unwrap();
        assert_eq!(String::from_utf8(line).unwrap(), text);
        assert_eq!(bytes, raw.len());
    }

    #[tokio::test]
    async fn test_invalid_bytes_replaced() {
        let codec = codec("utf-8");
        let mut reader = reader(b"ok\xff\n".to_vec(), &codec, 16);

        let (line, bytes) = reader.next_line().await.unwrap();
        assert_eq!(String::from_utf8(line).unwrap(), "ok\u{FFFD}\n");
        assert_eq!(bytes, 4);
    }

    #[tokio::test]
    async fn test_overlong_line_is_cut_and_counted() {
        let long = "x".repeat(100);
        let raw = format!("short\n{}\ntail\n", long).into_bytes();
        let mut reader = reader_with_limit(raw.clone(), &Codec::plain(), 4, 16);

        let lines = collect(&mut reader).await;
        assert_eq!(
            lines,
            vec![
                ("short\n".to_string(), 6),
                (format!("{}\n", "x".repeat(16)), 101),
                ("tail\n".to_string(), 5),
            ]
        );
        let total: usize = lines.iter().map(|(_, b)| b).sum();
        assert_eq!(total, raw.len());
    }

    #[tokio::test]
    async fn test_unterminated_stream_stays_bounded() {
        let codec = codec("utf-16le");
        let raw = codec.encode(&"é".repeat(5000));
        let mut reader = reader_with_limit(raw.clone(), &codec, 64, 256);

        assert!(matches!(reader.next_line().await, Err(Error::Eof)));
        assert_eq!(reader.offset(), raw.len() as u64);
        assert!(reader.raw.len() <= 256 + 64);
        assert!(reader.line.len() <= 256);
        assert_eq!(reader.drained + reader.raw.len(), raw.len());
        // the kept prefix still decodes to whole characters
        assert!(std::str::from_utf8(&reader.line).is_ok());
    }

    #[tokio::test]
    async fn test_overlong_utf16_line_keeps_alignment() {
        let codec = codec("utf-16be");
        let text = format!("{}\nnext\n", "ab".repeat(200));
        let raw = codec.encode(&text);

        let mut reader = reader_with_limit(raw.clone(), &codec, 7, 32);
        let lines = collect(&mut reader).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, format!("{}\n", "ab".repeat(16)));
        assert_eq!(lines[1], ("next\n".to_string(), 10));
        assert_eq!(lines[0].1 + lines[1].1, raw.len());
    }

    #[tokio::test]
    async fn test_message_counts_raw_bytes() {
        let codec = codec("utf-16be");
        let mut reader = reader(codec.encode("hi\n"), &codec, 16);

        let message = reader.next().await.unwrap();
        assert_eq!(&message.content[..], b"hi\n");
        assert_eq!(message.bytes, 6);
    }
}
