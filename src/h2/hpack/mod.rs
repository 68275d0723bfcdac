//! HPACK header compression (RFC 7541): a 61-entry static table, Huffman
//! coding, and a bounded per-connection dynamic table shared between one
//! [`Encoder`] and its peer's matching [`Decoder`].

mod decoder;
mod encoder;
mod huffman;
mod table;

pub use self::decoder::Decoder;
pub use self::encoder::Encoder;
pub use self::table::ENTRY_OVERHEAD;

/// One decoded or to-be-encoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
    /// "Never indexed" per RFC 7541 §6.2.3 — callers must not insert this
    /// into the dynamic table even if the encoder form would otherwise allow
    /// it (used for header values like `authorization`).
    pub sensitive: bool,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Header {
        Header {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    pub fn sensitive(name: impl Into<String>, value: impl Into<String>) -> Header {
        Header {
            name: name.into(),
            value: value.into(),
            sensitive: true,
        }
    }
}

/// Errors produced while decoding an HPACK header block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DecoderError {
    UnexpectedEndOfStream,
    IntegerOverflow,
    InvalidTableIndex,
    InvalidHuffmanCode,
    InvalidUtf8,
}

impl std::fmt::Display for DecoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for DecoderError {}
