//! Regular file source

use super::{closed_error, Source, SourceStat};
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// A plain file that may keep growing while it is read
pub struct FileSource {
    file: Option<File>,
    path: PathBuf,
    name: String,
}

impl FileSource {
    /// Open `path` for reading, rejecting anything but regular files
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Tried to open non regular file: {}", path.display()),
            ));
        }

        debug!(path = %path.display(), size = metadata.len(), "opened file source");

        Ok(Self {
            file: Some(file),
            name: path.to_string_lossy().to_string(),
            path,
        })
    }

    /// Path the file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Source for FileSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf).await,
            None => Err(closed_error(&self.name)),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&mut self) -> io::Result<SourceStat> {
        match self.file.as_ref() {
            Some(file) => Ok(SourceStat::from(&file.metadata().await?)),
            None => Err(closed_error(&self.name)),
        }
    }

    fn continuable(&self) -> bool {
        true
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.file.as_mut() {
            Some(file) => file.seek(pos).await,
            None => Err(closed_error(&self.name)),
        }
    }
}
