//! Peer wire protocol: handshake, framed messages, and the single-connection
//! session state machine that drives a download.
use thiserror::Error;

pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod session;

pub use bitfield::Bitfield;
pub use handshake::Handshake;
pub use message::Message;
pub use session::{PeerSession, SessionState};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake failed: Invalid protocol identifier")]
    HandshakeInvalidProtocol,

    #[error("Handshake failed: Info hash mismatch")]
    HandshakeInfoHashMismatch,

    #[error("Peer closed the connection without sending a bitfield (no pieces)")]
    NoPieces,

    #[error("Unknown message id {0}")]
    UnknownMessage(u8),

    #[error("Malformed payload for message id {id}")]
    MalformedMessage { id: u8 },

    #[error("Frame of {len} bytes exceeds the block transfer limit")]
    OversizedFrame { len: usize },

    #[error("Expected a {expected} message, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Piece {index}: block at offset {begin} does not match the outstanding request")]
    BlockMismatch { index: u32, begin: u32 },

    #[error("Piece {index}: SHA-1 digest mismatch")]
    PieceDigestMismatch { index: u32 },

    #[error("Piece index {index} is out of range")]
    PieceOutOfRange { index: u32 },
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
