//! Gzip-compressed file source, read once to the end

use super::{closed_error, Source, SourceStat};
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// A gzip file decompressed on the fly; end of file is final
pub struct GzipSource {
    decoder: Option<MultiGzDecoder<File>>,
    path: PathBuf,
    name: String,
}

impl GzipSource {
    /// Open the compressed file at `path`
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let opened = path.clone();
        let file = tokio::task::spawn_blocking(move || File::open(opened))
            .await
            .map_err(io::Error::other)??;

        Ok(Self {
            decoder: Some(MultiGzDecoder::new(file)),
            name: path.to_string_lossy().to_string(),
            path,
        })
    }
}

#[async_trait]
impl Source for GzipSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut decoder = self.decoder.take().ok_or_else(|| closed_error(&self.name))?;
        let len = buf.len();

        let (decoder, result, chunk) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; len];
            let result = decoder.read(&mut chunk);
            (decoder, result, chunk)
        })
        .await
        .map_err(io::Error::other)?;

        self.decoder = Some(decoder);
        let n = result?;
        buf[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.decoder.take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&mut self) -> io::Result<SourceStat> {
        SourceStat::from_path(&self.path).await
    }

    fn continuable(&self) -> bool {
        false
    }
}
