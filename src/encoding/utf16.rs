//! Byte order mark probing for UTF-16 sources

use crate::source::Source;
use crate::{Error, Result};
use encoding_rs::Encoding;
use std::io::{self, SeekFrom};
use tracing::debug;

const BOM_BE: [u8; 2] = [0xFE, 0xFF];
const BOM_LE: [u8; 2] = [0xFF, 0xFE];

/// What to do when a UTF-16 source lacks a byte order mark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BomPolicy {
    /// A missing BOM is an error
    Required,
    /// Use the given byte order when no BOM is present
    Fallback(&'static Encoding),
}

impl BomPolicy {
    /// Determine the byte order of `source`.
    ///
    /// A BOM found at the current position is consumed. Otherwise the source is
    /// rewound to exactly where it was.
    pub(crate) async fn probe(&self, source: &mut dyn Source) -> Result<&'static Encoding> {
        let start = source.seek(SeekFrom::Current(0)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::Unsupported {
                Error::Config(format!("UTF-16 BOM detection requires a seekable source: {}", source.name()))
            } else {
                Error::Io(e)
            }
        })?;

        let mut bom = [0u8; 2];
        let mut filled = 0;
        while filled < bom.len() {
            let n = source.read(&mut bom[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == bom.len() {
            match bom {
                BOM_BE => return Ok(encoding_rs::UTF_16BE),
                BOM_LE => return Ok(encoding_rs::UTF_16LE),
                _ => {}
            }
        }

        source.seek(SeekFrom::Start(start)).await?;
        debug!(source = source.name(), offset = start, "no byte order mark, rewound");

        match self {
            BomPolicy::Required => Err(Error::MissingBom(source.name().to_string())),
            BomPolicy::Fallback(encoding) => Ok(*encoding),
        }
    }
}
