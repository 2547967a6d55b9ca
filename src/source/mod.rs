//! Byte sources the tailing reader can follow
//!
//! A [`Source`] is a raw byte stream plus enough metadata (name, stat, identity)
//! for the tailing reader to tell a growing file from a truncated, renamed or
//! removed one.

pub mod file;
#[cfg(feature = "compression")]
pub mod gzip;
pub mod stream;

use async_trait::async_trait;
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

pub use file::FileSource;
#[cfg(feature = "compression")]
pub use gzip::GzipSource;
pub use stream::{StdinSource, StreamSource};

/// Identity of a file that is stable across renames.
///
/// On Unix this is the device ID plus inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    /// Create a FileId from raw device and inode values
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identity of the file described by `metadata`
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        Some(Self::new(metadata.dev(), metadata.ino()))
    }

    /// Identity of the file described by `metadata`
    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Snapshot of a source's size and identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStat {
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if known
    pub modified: Option<SystemTime>,
    /// Stable identity, if the platform provides one
    pub id: Option<FileId>,
}

impl From<&Metadata> for SourceStat {
    fn from(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            id: FileId::from_metadata(metadata),
        }
    }
}

impl SourceStat {
    /// Stat whatever file `path` currently resolves to
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self::from(&metadata))
    }

    /// Returns true if both stats describe the same underlying file
    pub fn same_file(&self, other: &SourceStat) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// A raw byte stream consumed by the tailing reader
#[async_trait]
pub trait Source: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means end of the current data
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the underlying handle
    async fn close(&mut self) -> io::Result<()>;

    /// Name of the source, the path for files
    fn name(&self) -> &str;

    /// Stat the open handle
    async fn stat(&mut self) -> io::Result<SourceStat>;

    /// Whether end of file only means "no data yet"
    fn continuable(&self) -> bool;

    /// Reposition the read cursor; unsupported by default
    async fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not seekable", self.name()),
        ))
    }
}

pub(crate) fn closed_error(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("{} is closed", name))
}
