//! The BitTorrent peer handshake.
//!
//! The handshake is the first message exchanged between two peers. It proves
//! both ends are talking about the same torrent (via the info hash) and
//! carries each side's peer id.
use super::{PeerError, PeerResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed size of a handshake frame on the wire.
pub const HANDSHAKE_LEN: usize = 68;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/** Represents a BitTorrent handshake message.

Only the two fields that carry information are kept; the protocol string and
the reserved bytes are fixed and validated on receipt. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /** Creates a new handshake with the specified info hash and peer id.

    Arguments:
    - info_hash - The SHA-1 digest of the torrent's info dictionary
    - peer_id - The 20-byte identifier of this client */
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes into the 68-byte wire format:
    ///
    /// | offset | bytes | content                  |
    /// |--------|-------|--------------------------|
    /// | 0      | 1     | 19                       |
    /// | 1      | 19    | `"BitTorrent protocol"`  |
    /// | 20     | 8     | zero (reserved)          |
    /// | 28     | 20    | info hash                |
    /// | 48     | 20    | peer id                  |
    ///
    /// # Returns
    /// * `[u8; 68]` - The complete frame, ready to write to the socket
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        // bytes 20..28 stay zero (reserved)
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a received handshake, validating the protocol length and
    /// string. Reserved bytes are ignored.
    ///
    /// # Arguments
    /// * `buf` - The 68 bytes read off the socket
    ///
    /// # Returns
    /// * `PeerResult<Self>` - The remote info hash and peer id, or
    ///   `HandshakeInvalidProtocol` if the length byte is not 19 or the
    ///   protocol string is not "BitTorrent protocol"
    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> PeerResult<Self> {
        if buf[0] != PROTOCOL.len() as u8 || &buf[1..20] != PROTOCOL {
            return Err(PeerError::HandshakeInvalidProtocol);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Performs the full exchange on an open stream.
    ///
    /// # How it works
    /// 1. Serializes and writes our handshake, flushing it fully.
    /// 2. Reads exactly 68 bytes back.
    /// 3. Validates the protocol string.
    /// 4. Checks that the peer echoed the same info hash.
    /// 5. Returns the peer's handshake, carrying its id.
    ///
    /// # Arguments
    /// * `stream` - An open duplex byte stream to the peer
    /// * `info_hash` - The torrent's info digest
    /// * `peer_id` - Our client's peer id
    ///
    /// # Returns
    /// * `PeerResult<Handshake>` - The peer's handshake if successful
    ///
    /// # Errors
    /// Returns an error if:
    /// - The stream fails or closes mid-handshake (a short read)
    /// - The protocol string is wrong
    /// - The echoed info hash differs from ours
    pub async fn exchange<S>(
        stream: &mut S,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<Handshake>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize()).await?;
        stream.flush().await?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        let theirs = Handshake::parse(&buf)?;

        if theirs.info_hash != info_hash {
            return Err(PeerError::HandshakeInfoHashMismatch);
        }
        Ok(theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_the_fixed_layout() {
        let handshake = Handshake::new([0x11; 20], [0x22; 20]);
        let bytes = handshake.serialize();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[0x11; 20]);
        assert_eq!(&bytes[48..68], &[0x22; 20]);
    }

    #[test]
    fn parse_round_trips() {
        let handshake = Handshake::new([0x11; 20], [0x22; 20]);
        assert_eq!(Handshake::parse(&handshake.serialize()).unwrap(), handshake);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new([0x11; 20], [0x22; 20]).serialize();
        bytes[5] ^= 0xff;
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(PeerError::HandshakeInvalidProtocol)
        ));
    }

    #[tokio::test]
    async fn exchange_captures_the_remote_id() {
        let (mut ours, mut theirs) = tokio::io::duplex(256);
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; HANDSHAKE_LEN];
            theirs.read_exact(&mut buf).await.unwrap();
            let received = Handshake::parse(&buf).unwrap();
            let reply = Handshake::new(received.info_hash, [0x99; 20]);
            theirs.write_all(&reply.serialize()).await.unwrap();
        });

        let remote = Handshake::exchange(&mut ours, [0x11; 20], [0x22; 20])
            .await
            .unwrap();
        assert_eq!(remote.peer_id, [0x99; 20]);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn exchange_rejects_a_different_info_hash() {
        let (mut ours, mut theirs) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut buf = [0u8; HANDSHAKE_LEN];
            theirs.read_exact(&mut buf).await.unwrap();
            let reply = Handshake::new([0xee; 20], [0x99; 20]);
            theirs.write_all(&reply.serialize()).await.unwrap();
        });

        assert!(matches!(
            Handshake::exchange(&mut ours, [0x11; 20], [0x22; 20]).await,
            Err(PeerError::HandshakeInfoHashMismatch)
        ));
    }
}
