//! Assembles the reader chain for one source

use super::{
    JsonReader, LimitReader, LineReader, MultilineReader, MultilineRules, Reader, StripNewline, TailReader,
    TimeoutReader,
};
use crate::config::ReaderConfig;
use crate::encoding;
use crate::source::Source;
use crate::types::Message;
use crate::Result;
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Separator placed between folded multiline lines
const LINE_SEPARATOR: &str = "\n";

/// Decoded bytes a single line may hold, as a multiple of `max_bytes`
const LINE_BUFFER_FACTOR: usize = 4;

/// A fully assembled reader chain
pub struct Pipeline {
    reader: Box<dyn Reader>,
    name: String,
    encoding: &'static str,
    offset: u64,
}

impl Pipeline {
    /// Build the chain over `source`, resuming at raw byte `offset`.
    ///
    /// The encoding is resolved before seeking, so byte order marks are probed
    /// at the current position of the source. With an `offset` of zero the
    /// pipeline starts wherever probing left the source.
    pub async fn open(
        mut source: Box<dyn Source>,
        config: &ReaderConfig,
        offset: u64,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let factory = encoding::resolve(&config.encoding)?;
        let rules = config.multiline.as_ref().map(MultilineRules::from_config).transpose()?;

        let codec = factory.open(source.as_mut()).await?;

        let start = if offset > 0 {
            source.seek(SeekFrom::Start(offset)).await?
        } else {
            match source.seek(SeekFrom::Current(0)).await {
                Ok(position) => position,
                Err(e) if e.kind() == io::ErrorKind::Unsupported => 0,
                Err(e) => return Err(e.into()),
            }
        };

        let name = source.name().to_string();
        debug!(source = %name, encoding = codec.name(), offset = start, "opening reader pipeline");

        let tail = TailReader::new(source, config.tail.clone(), start, cancel.clone());
        let mut reader: Box<dyn Reader> = Box::new(LineReader::new(
            tail,
            &codec,
            config.buffer_size,
            config.max_bytes.saturating_mul(LINE_BUFFER_FACTOR),
        ));
        reader = Box::new(StripNewline::new(reader));

        if let Some(json) = &config.json {
            reader = Box::new(JsonReader::new(reader, json.clone()));
        }

        if let (Some(rules), Some(multiline)) = (rules, &config.multiline) {
            if let Some(timeout) = multiline.timeout() {
                reader = Box::new(TimeoutReader::new(reader, timeout, cancel));
            }
            reader = Box::new(MultilineReader::new(reader, rules, LINE_SEPARATOR, config.max_bytes));
        }

        reader = Box::new(LimitReader::new(reader, config.max_bytes));

        Ok(Self {
            reader,
            name,
            encoding: codec.name(),
            offset: start,
        })
    }

    /// Name of the source being read
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the resolved encoding
    pub fn encoding(&self) -> &'static str {
        self.encoding
    }

    /// Raw offset the first message starts at
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[async_trait]
impl Reader for Pipeline {
    async fn next(&mut self) -> Result<Message> {
        self.reader.next().await
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}
