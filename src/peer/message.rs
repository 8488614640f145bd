//! Framed peer messages.
//!
//! After the handshake every message on the wire is
//! `<len: u32 BE><id: u8><payload>`; a frame with `len == 0` is a keep-alive
//! and carries no id. All integers are big-endian.
use super::{PeerError, PeerResult};
use byteorder::{BigEndian, ByteOrder};
use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a legal frame: the 13-byte `piece` header plus one 16 KiB
/// block. Anything longer is a protocol violation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 + 13;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
}

impl Message {
    /// Serializes into a complete frame, length prefix included.
    ///
    /// # Returns
    /// * `Vec<u8>` - `<len: u32 BE><id: u8><payload>`, or the bare 4-byte
    ///   zero prefix for a keep-alive
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 1 + self.payload_len());
        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(0);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(1);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(2);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(3);
            }
            Message::Have(index) => {
                buf.put_u32(5);
                buf.put_u8(4);
                buf.put_u32(*index);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(5);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(6);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                buf.put_u32(9 + block.len() as u32);
                buf.put_u8(7);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
        }
        buf
    }

    /// Parses a frame body (id byte plus payload, length prefix already
    /// consumed and known to be non-zero).
    ///
    /// # Arguments
    /// * `frame` - The frame's bytes after the length prefix
    ///
    /// # Returns
    /// * `PeerResult<Message>` - The decoded message, or an error if:
    ///   - The id is outside the 0..=7 range this client speaks
    ///   - The payload length does not fit the id's fixed shape
    pub fn from_frame(frame: &[u8]) -> PeerResult<Message> {
        let (&id, payload) = frame
            .split_first()
            .ok_or(PeerError::MalformedMessage { id: 0 })?;
        let malformed = PeerError::MalformedMessage { id };

        let message = match id {
            0..=3 => {
                if !payload.is_empty() {
                    return Err(malformed);
                }
                match id {
                    0 => Message::Choke,
                    1 => Message::Unchoke,
                    2 => Message::Interested,
                    _ => Message::NotInterested,
                }
            }
            4 => {
                if payload.len() != 4 {
                    return Err(malformed);
                }
                Message::Have(BigEndian::read_u32(payload))
            }
            5 => Message::Bitfield(payload.to_vec()),
            6 => {
                if payload.len() != 12 {
                    return Err(malformed);
                }
                Message::Request {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                }
            }
            7 => {
                if payload.len() < 8 {
                    return Err(malformed);
                }
                Message::Piece {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    block: payload[8..].to_vec(),
                }
            }
            other => return Err(PeerError::UnknownMessage(other)),
        };
        Ok(message)
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 0,
            Message::Have(_) => 4,
            Message::Bitfield(bits) => bits.len(),
            Message::Request { .. } => 12,
            Message::Piece { block, .. } => 8 + block.len(),
        }
    }

    /// Wire name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have(_) => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece { .. } => "piece",
        }
    }
}

/// Reads one framed message, looping on the socket until the full frame has
/// arrived.
///
/// # Arguments
/// * `reader` - The stream to read from
///
/// # Returns
/// * `PeerResult<Message>` - The next message; a zero-length frame comes
///   back as `Message::KeepAlive`
///
/// # Errors
/// Returns an error if:
/// - The connection closes mid-frame (a short read surfaces as
///   `UnexpectedEof` through the I/O error)
/// - The declared length exceeds [`MAX_FRAME_LEN`]
/// - The frame body does not parse
pub async fn read_message<R>(reader: &mut R) -> PeerResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Ok(Message::KeepAlive);
    }
    if len > MAX_FRAME_LEN {
        return Err(PeerError::OversizedFrame { len });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Message::from_frame(&frame)
}

/// Writes one framed message and flushes it; a short write is fatal.
///
/// # Arguments
/// * `writer` - The stream to write to
/// * `message` - The message to frame and send
pub async fn write_message<W>(writer: &mut W, message: &Message) -> PeerResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
