//! Bencode codec: the self-describing binary encoding used by the BitTorrent
//! protocol for metainfo files, tracker replies, and nothing else in between.
//!
//! The decoder lives in [`decoder`], the canonical encoder in [`encoder`], and
//! the human-inspection renderer in [`render`].
use thiserror::Error;

pub mod decoder;
pub mod encoder;
pub mod render;

pub use decoder::{decode, raw_slice, Decoder};
pub use encoder::encode;

/// A decoded bencode value.
///
/// Four variants cover the whole format:
///
/// - `String(Vec<u8>)`: a byte string. Bencode strings are raw bytes, not
///   text; `pieces` in a metainfo file is a string full of SHA-1 digests.
///   `"4:spam"` decodes to `String(b"spam")`.
/// - `Integer(i64)`: `"i42e"` decodes to `Integer(42)`.
/// - `List(Vec<BencodeValue>)`: `"l4:spami42ee"` decodes to
///   `List([String(b"spam"), Integer(42)])`.
/// - `Dict(Vec<(Vec<u8>, BencodeValue)>)`: an *ordered* sequence of pairs,
///   kept in the order the source encoded them. Well-formed input sorts keys
///   lexicographically but real-world torrents sometimes do not, so the
///   decoder preserves whatever order it finds. Lookup is linear; the
///   metainfo schema only ever asks for a handful of well-known keys.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(Vec<(Vec<u8>, BencodeValue)>),
}

impl BencodeValue {
    /// Linear lookup of `key` when `self` is a dictionary.
    pub fn dict_find(&self, key: &[u8]) -> Option<&BencodeValue> {
        match self {
            BencodeValue::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_slice() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Custom error type for bencode operations.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("Invalid integer format")]
    InvalidInteger,

    #[error("Invalid string length")]
    InvalidStringLength,

    #[error("Unexpected end of input")]
    UnexpectedEoi,

    #[error("Dictionary keys must be strings")]
    DictKeyNotString,

    #[error("Nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Input continues past the end of the value")]
    TrailingBytes,

    #[error("Dictionary keys must be sorted lexicographically")]
    UnsortedKeys,

    #[error("Dictionary has no {0:?} key")]
    KeyNotFound(String),
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
