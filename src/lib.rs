//! # logtail - Log Tailing Reader Pipeline
//!
//! logtail is the reading core of a lightweight log shipper. It follows growing
//! files (and other byte streams), turns raw bytes into logical log events and
//! reports how many raw bytes every event consumed, so a harvester can persist an
//! exact resume offset.
//!
//! ## Features
//!
//! - **Tailing**: backoff-driven polling with typed truncate/rename/remove/inactive failures
//! - **Encodings**: UTF-8, UTF-16 (with BOM probing), GBK, Big5, latin1 family and more
//! - **Multiline**: regex-driven event grouping with flush patterns and timeouts
//! - **JSON**: unwrap JSON-encoded lines into structured fields
//! - **Exact offsets**: raw byte accounting survives decoding, stripping and truncation
//!
//! ## Quick Start
//!
//! ```no_run
//! use logtail::config::ReaderConfig;
//! use logtail::reader::{Pipeline, Reader};
//! use logtail::source::FileSource;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = FileSource::open("/var/log/app.log").await?;
//!     let config = ReaderConfig::default();
//!     let mut pipeline = Pipeline::open(Box::new(source), &config, 0, CancellationToken::new()).await?;
//!
//!     loop {
//!         let message = pipeline.next().await?;
//!         println!("{} ({} raw bytes)", message.text(), message.bytes);
//!     }
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod encoding;
pub mod harvester;
pub mod reader;
pub mod source;
pub mod types;

/// Common error types used throughout logtail
pub mod error {
    use crate::types::Message;
    use std::io;
    use thiserror::Error;

    /// logtail error types
    #[derive(Debug, Error)]
    pub enum Error {
        /// I/O operation failed
        #[error("I/O error: {0}")]
        Io(#[from] io::Error),

        /// Serialization/deserialization failed
        #[error("Serialization error: {0}")]
        Json(#[from] serde_json::Error),

        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(String),

        /// The configured encoding name could not be resolved
        #[error("unknown encoding('{0}')")]
        UnknownEncoding(String),

        /// Multiline match mode is neither `before` nor `after`
        #[error("unknown matcher type: {0}")]
        InvalidMatchMode(String),

        /// A multiline or flush pattern failed to compile
        #[error("Regex error: {0}")]
        Regex(#[from] regex::Error),

        /// `utf-16-bom` requested but the source starts without a byte order mark
        #[error("no byte order mark found at start of {0}")]
        MissingBom(String),

        /// A harvester could not be registered
        #[error("Harvester error: {0}")]
        Harvester(String),

        /// Source reached its final end (stdin closed, gzip fully read, close_eof)
        #[error("end of file reached")]
        Eof,

        /// Source became smaller than the current read offset
        #[error("file was truncated")]
        Truncated,

        /// Path now points at a different file than the one being read
        #[error("file was renamed")]
        Renamed,

        /// Path no longer exists
        #[error("file was removed")]
        Removed,

        /// Nothing was read for longer than close_inactive
        #[error("file inactive")]
        Inactive,

        /// Reader was stopped from the outside
        #[error("reader closed")]
        Closed,

        /// No line arrived before the multiline timeout elapsed
        #[error("multiline timeout")]
        Timeout,

        /// Error reported together with bytes already consumed from the source.
        ///
        /// The builtin sources never produce it: the line reader holds an
        /// unterminated tail back instead. A [`Source`](crate::source::Source)
        /// or stage that must hand over what it read before failing wraps the
        /// data here; multiline folds it into the pending event, the limit
        /// stage caps it and the harvester forwards it and counts its bytes.
        #[error("{source} (after reading {} bytes)", partial.bytes)]
        Partial {
            /// Content read before the failure
            partial: Box<Message>,
            /// Underlying failure
            source: Box<Error>,
        },
    }

    impl Error {
        /// Returns true for source lifecycle conditions that end a pipeline
        pub fn is_terminal(&self) -> bool {
            match self {
                Error::Eof
                | Error::Truncated
                | Error::Renamed
                | Error::Removed
                | Error::Inactive
                | Error::Closed => true,
                Error::Partial { source, .. } => source.is_terminal(),
                _ => false,
            }
        }

        /// Returns true for the internal multiline timeout signal
        pub fn is_timeout(&self) -> bool {
            matches!(self, Error::Timeout)
        }

        /// Splits off any partially read message, leaving the bare cause
        pub fn into_parts(self) -> (Option<Message>, Error) {
            match self {
                Error::Partial { partial, source } => (Some(*partial), *source),
                other => (None, other),
            }
        }
    }

    /// Result type alias for logtail operations
    pub type Result<T> = std::result::Result<T, Error>;
}

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{HarvesterConfig, JsonConfig, MultilineConfig, ReaderConfig, TailConfig};
    pub use crate::harvester::{Event, HarvestOutcome, Harvester, Registry};
    pub use crate::reader::{Pipeline, Reader};
    pub use crate::source::{FileSource, Source, StdinSource};
    pub use crate::types::{Fields, Message};
    pub use crate::{Error, Result};
}
