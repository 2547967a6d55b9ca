//! Character encodings for decoding raw source bytes
//!
//! [`find_encoding`] maps a configured name to a [`Factory`]. Opening the
//! factory against a source yields a [`Codec`], which knows how a newline looks
//! in the encoded stream and hands out streaming decoders producing UTF-8.

mod utf16;

use crate::source::Source;
use crate::{Error, Result};
use encoding_rs::{CoderResult, Encoding};
use tracing::debug;

pub use utf16::BomPolicy;

/// Size of the scratch buffer used while decoding
const DECODE_CHUNK: usize = 1024;

/// Recipe for building a [`Codec`] once the source is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factory {
    /// Bytes pass through untouched
    Plain,
    /// A fixed character set
    Charset(&'static Encoding),
    /// UTF-16 whose byte order is taken from a byte order mark
    Utf16Bom(BomPolicy),
}

/// Resolve an encoding name, case-insensitively.
///
/// Names missing from the builtin table fall back to the WHATWG label registry.
pub fn find_encoding(name: &str) -> Option<Factory> {
    let name = name.trim().to_ascii_lowercase();

    let encoding = match name.as_str() {
        "" | "plain" | "nop" => return Some(Factory::Plain),

        "utf-8" | "utf8" | "unicode-1-1-utf-8" => encoding_rs::UTF_8,

        // gbk must not go through the label registry, which maps it to gb18030
        "gbk" => encoding_rs::GBK,
        "gb18030" => encoding_rs::GB18030,
        "big5" => encoding_rs::BIG5,
        "euc-jp" => encoding_rs::EUC_JP,
        "iso2022jp" | "iso-2022-jp" => encoding_rs::ISO_2022_JP,
        "shift-jis" | "shiftjis" | "sjis" => encoding_rs::SHIFT_JIS,
        "euc-kr" => encoding_rs::EUC_KR,

        "koi8r" | "koi8-r" => encoding_rs::KOI8_R,
        "koi8u" | "koi8-u" => encoding_rs::KOI8_U,
        "ibm866" => encoding_rs::IBM866,
        "macintosh" => encoding_rs::MACINTOSH,

        "iso8859-1" | "latin1" | "windows1252" => encoding_rs::WINDOWS_1252,
        "iso8859-2" => encoding_rs::ISO_8859_2,
        "iso8859-3" => encoding_rs::ISO_8859_3,
        "iso8859-4" => encoding_rs::ISO_8859_4,
        "iso8859-5" => encoding_rs::ISO_8859_5,
        "iso8859-6" => encoding_rs::ISO_8859_6,
        "iso8859-7" => encoding_rs::ISO_8859_7,
        "iso8859-8" => encoding_rs::ISO_8859_8,
        "iso8859-9" | "windows1254" => encoding_rs::WINDOWS_1254,
        "iso8859-10" => encoding_rs::ISO_8859_10,
        "iso8859-13" => encoding_rs::ISO_8859_13,
        "iso8859-14" => encoding_rs::ISO_8859_14,
        "iso8859-15" => encoding_rs::ISO_8859_15,
        "iso8859-16" => encoding_rs::ISO_8859_16,
        "windows1250" => encoding_rs::WINDOWS_1250,
        "windows1251" => encoding_rs::WINDOWS_1251,
        "windows1253" => encoding_rs::WINDOWS_1253,
        "windows1255" => encoding_rs::WINDOWS_1255,
        "windows1256" => encoding_rs::WINDOWS_1256,
        "windows1257" => encoding_rs::WINDOWS_1257,
        "windows1258" => encoding_rs::WINDOWS_1258,
        "windows874" => encoding_rs::WINDOWS_874,

        "utf-16be" => encoding_rs::UTF_16BE,
        "utf-16le" => encoding_rs::UTF_16LE,
        "utf-16-bom" => return Some(Factory::Utf16Bom(BomPolicy::Required)),
        "utf-16be-bom" => return Some(Factory::Utf16Bom(BomPolicy::Fallback(encoding_rs::UTF_16BE))),
        "utf-16le-bom" => return Some(Factory::Utf16Bom(BomPolicy::Fallback(encoding_rs::UTF_16LE))),

        other => return Encoding::for_label(other.as_bytes()).map(Factory::Charset),
    };

    Some(Factory::Charset(encoding))
}

/// Like [`find_encoding`], failing with [`Error::UnknownEncoding`]
pub fn resolve(name: &str) -> Result<Factory> {
    find_encoding(name).ok_or_else(|| Error::UnknownEncoding(name.to_string()))
}

impl Factory {
    /// Build the codec for `source`.
    ///
    /// BOM variants read from the current position of `source` and rewind when
    /// no byte order mark is present.
    pub async fn open(&self, source: &mut dyn Source) -> Result<Codec> {
        let encoding = match *self {
            Factory::Plain => None,
            Factory::Charset(encoding) => Some(encoding),
            Factory::Utf16Bom(policy) => Some(policy.probe(source).await?),
        };

        let codec = Codec::new(encoding);
        debug!(source = source.name(), encoding = codec.name(), "resolved encoding");
        Ok(codec)
    }
}

/// A resolved encoding for one opened source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    encoding: Option<&'static Encoding>,
    newline: Vec<u8>,
}

impl Codec {
    /// Codec for `encoding`, or the plain pass-through codec for `None`
    pub fn new(encoding: Option<&'static Encoding>) -> Self {
        let mut codec = Self {
            encoding,
            newline: Vec::new(),
        };
        codec.newline = codec.encode("\n");
        codec
    }

    /// The pass-through codec
    pub fn plain() -> Self {
        Self::new(None)
    }

    /// Name of the underlying encoding
    pub fn name(&self) -> &'static str {
        self.encoding.map_or("plain", Encoding::name)
    }

    /// The newline character as it appears in the raw stream
    pub fn newline(&self) -> &[u8] {
        &self.newline
    }

    /// Encode text into the raw representation of this codec
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self.encoding {
            None => text.as_bytes().to_vec(),
            Some(enc) if enc == encoding_rs::UTF_16LE => {
                text.encode_utf16().flat_map(u16::to_le_bytes).collect()
            }
            Some(enc) if enc == encoding_rs::UTF_16BE => {
                text.encode_utf16().flat_map(u16::to_be_bytes).collect()
            }
            Some(enc) => enc.encode(text).0.into_owned(),
        }
    }

    /// A fresh streaming decoder
    pub fn decoder(&self) -> Decoder {
        Decoder {
            inner: self.encoding.map(Encoding::new_decoder_without_bom_handling),
        }
    }
}

/// Streaming decoder producing UTF-8; malformed input becomes U+FFFD
pub struct Decoder {
    inner: Option<encoding_rs::Decoder>,
}

impl Decoder {
    /// Decode `src` onto the end of `out`, returning the number of bytes consumed.
    ///
    /// Incomplete trailing sequences stay buffered inside the decoder and are
    /// completed by the next call.
    pub fn decode(&mut self, src: &[u8], out: &mut Vec<u8>) -> usize {
        let Some(decoder) = self.inner.as_mut() else {
            out.extend_from_slice(src);
            return src.len();
        };

        let mut scratch = [0u8; DECODE_CHUNK];
        let mut consumed = 0;
        loop {
            let (result, read, written, _) =
                decoder.decode_to_utf8(&src[consumed..], &mut scratch, false);
            consumed += read;
            out.extend_from_slice(&scratch[..written]);

            match result {
                CoderResult::InputEmpty => return consumed,
                CoderResult::OutputFull => continue,
            }
        }
    }
}
