//! Non-seekable stream sources such as stdin or pipes

use super::{closed_error, Source, SourceStat};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Standard input as a source
pub type StdinSource = StreamSource<tokio::io::Stdin>;

/// Any async byte stream whose end of file is final
pub struct StreamSource<R> {
    inner: Option<R>,
    name: String,
}

impl<R> StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap `inner` under the given name
    pub fn new(name: impl Into<String>, inner: R) -> Self {
        Self {
            inner: Some(inner),
            name: name.into(),
        }
    }
}

impl StreamSource<tokio::io::Stdin> {
    /// The process's standard input
    pub fn stdin() -> Self {
        Self::new("-", tokio::io::stdin())
    }
}

#[async_trait]
impl<R> Source for StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf).await,
            None => Err(closed_error(&self.name)),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&mut self) -> io::Result<SourceStat> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} cannot be stat'ed", self.name),
        ))
    }

    fn continuable(&self) -> bool {
        false
    }
}
