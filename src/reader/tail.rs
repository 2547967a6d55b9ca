//! Tailing byte reader
//!
//! Turns end of file on a growing file into a bounded backoff wait and reports
//! truncation, renames, removal and inactivity as distinct errors.

use crate::config::TailConfig;
use crate::source::{Source, SourceStat};
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reads a [`Source`] as if it never ended
pub struct TailReader {
    source: Box<dyn Source>,
    config: TailConfig,
    offset: u64,
    last_read: Instant,
    backoff: Duration,
    cancel: CancellationToken,
}

impl TailReader {
    /// Follow `source`, whose read position is `offset`
    pub fn new(source: Box<dyn Source>, config: TailConfig, offset: u64, cancel: CancellationToken) -> Self {
        let backoff = config.backoff();
        Self {
            source,
            config,
            offset,
            last_read: Instant::now(),
            backoff,
            cancel,
        }
    }

    /// Raw bytes read so far, including the starting offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Wait applied after the next empty read
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Name of the underlying source
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Read at least one byte, waiting while a growing file has no new data.
    ///
    /// Returns after a single successful read of the source, even a short one.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Closed);
            }

            let n = self.source.read(buf).await?;
            if n > 0 {
                self.offset += n as u64;
                self.last_read = Instant::now();
                self.backoff = self.config.backoff();
                return Ok(n);
            }
            if buf.is_empty() {
                return Ok(0);
            }

            self.check_eof().await?;

            debug!(source = self.source.name(), backoff = ?self.backoff, "end of file reached, backing off");
            self.wait().await?;
        }
    }

    /// Release the source
    pub async fn close(&mut self) -> Result<()> {
        self.source.close().await?;
        Ok(())
    }

    /// Decide whether end of file is final for this source
    async fn check_eof(&mut self) -> Result<()> {
        if !self.source.continuable() || self.config.close_eof {
            return Err(Error::Eof);
        }

        let info = self.source.stat().await?;
        let name = self.source.name();

        if info.size < self.offset {
            info!(source = name, size = info.size, offset = self.offset, "file was truncated");
            return Err(Error::Truncated);
        }

        if let Some(limit) = self.config.close_inactive() {
            if self.last_read.elapsed() > limit {
                info!(source = name, inactive = ?limit, "file is inactive");
                return Err(Error::Inactive);
            }
        }

        if self.config.close_renamed {
            let renamed = match SourceStat::from_path(name).await {
                Ok(current) => !info.same_file(&current),
                Err(_) => true,
            };
            if renamed {
                info!(source = name, "file was renamed");
                return Err(Error::Renamed);
            }
        }

        if self.config.close_removed && SourceStat::from_path(name).await.is_err() {
            info!(source = name, "file was removed");
            return Err(Error::Removed);
        }

        Ok(())
    }

    async fn wait(&mut self) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Closed),
            _ = sleep(self.backoff) => {}
        }

        let max = self.config.max_backoff();
        if self.backoff < max {
            self.backoff = (self.backoff * self.config.backoff_factor).min(max);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FileSource, StreamSource};
    use std::io::{Cursor, Write};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn fast_config() -> TailConfig {
        TailConfig {
            backoff_ms: 5,
            backoff_factor: 2,
            max_backoff_ms: 20,
            ..Default::default()
        }
    }

    async fn tail(path: &std::path::Path, config: TailConfig) -> TailReader {
        let source = FileSource::open(path).await.unwrap();
        TailReader::new(Box::new(source), config, 0, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_non_continuable_source_reports_eof() {
        let source = StreamSource::new("mem", Cursor::new(b"abc".to_vec()));
        let mut reader = TailReader::new(Box::new(source), fast_config(), 0, CancellationToken::new());

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 3);
        assert!(matches!(reader.read(&mut buf).await, Err(Error::Eof)));
        assert_eq!(reader.offset(), 3);
    }

    #[tokio::test]
    async fn test_close_eof() {
        let file = NamedTempFile::new().unwrap();
        let config = TailConfig {
            close_eof: true,
            ..fast_config()
        };
        let mut reader = tail(file.path(), config).await;

        let mut buf = [0u8; 16];
        assert!(matches!(reader.read(&mut buf).await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn test_waits_for_growth() {
        let mut file = NamedTempFile::new().unwrap();
        let mut reader = tail(file.path(), fast_config()).await;

        let path = file.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            f.write_all(b"late\n").unwrap();
        });

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"late\n");
        assert_eq!(reader.backoff(), Duration::from_millis(5));

        writer.await.unwrap();
        file.flush().unwrap();
    }

    #[tokio::test]
    async fn test_backoff_grows_to_ceiling() {
        let file = NamedTempFile::new().unwrap();
        let config = TailConfig {
            close_inactive_secs: 0,
            ..fast_config()
        };
        let mut reader = tail(file.path(), config).await;

        let mut buf = [0u8; 16];
        let result = tokio::time::timeout(Duration::from_millis(120), reader.read(&mut buf)).await;
        assert!(result.is_err(), "read should still be waiting");
        assert_eq!(reader.backoff(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_detects_truncation() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"0123456789\n").unwrap();
        file.flush().unwrap();

        let mut reader = tail(file.path(), fast_config()).await;
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 11);

        file.as_file().set_len(3).unwrap();
        assert!(matches!(reader.read(&mut buf).await, Err(Error::Truncated)));
    }

    #[tokio::test]
    async fn test_detects_inactivity() {
        let file = NamedTempFile::new().unwrap();
        let config = TailConfig {
            close_inactive_secs: 1,
            backoff_ms: 200,
            max_backoff_ms: 400,
            ..Default::default()
        };
        let mut reader = tail(file.path(), config).await;

        let mut buf = [0u8; 16];
        assert!(matches!(reader.read(&mut buf).await, Err(Error::Inactive)));
    }

    #[tokio::test]
    async fn test_detects_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let mut reader = tail(&path, fast_config()).await;
        std::fs::remove_file(&path).unwrap();

        let mut buf = [0u8; 16];
        assert!(matches!(reader.read(&mut buf).await, Err(Error::Removed)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detects_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let config = TailConfig {
            close_renamed: true,
            ..fast_config()
        };
        let mut reader = tail(&path, config).await;
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, b"").unwrap();

        let mut buf = [0u8; 16];
        assert!(matches!(reader.read(&mut buf).await, Err(Error::Renamed)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let file = NamedTempFile::new().unwrap();
        let config = TailConfig {
            backoff_ms: 60_000,
            max_backoff_ms: 60_000,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let source = FileSource::open(file.path()).await.unwrap();
        let mut reader = TailReader::new(Box::new(source), config, 0, cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let mut buf = [0u8; 16];
        let result = tokio::time::timeout(Duration::from_secs(5), reader.read(&mut buf))
            .await
            .expect("cancellation should end the wait");
        assert!(matches!(result, Err(Error::Closed)));
        canceller.await.unwrap();
    }
}
