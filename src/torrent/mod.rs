//! Metainfo file parsing and error handling logic.
//!
//! This module projects a decoded `.torrent` file into the handful of fields
//! the rest of the client needs, and computes the info digest over the raw
//! `info` bytes.
use thiserror::Error;

pub mod file;
pub mod info_hash;

pub use file::Torrent;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("Invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("Missing or invalid field: {0}")]
    MissingField(String),

    #[error("Invalid data type for field: {0}")]
    InvalidFieldType(String),

    #[error("Invalid pieces hash length")]
    InvalidPiecesHashLength,
}

/// Result type for torrent operations derived from `std::result`
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
