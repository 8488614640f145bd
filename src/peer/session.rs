//! One TCP connection to one peer, driven through the fixed pre-download
//! sequence: handshake, bitfield, interested, unchoke.
use super::handshake::Handshake;
use super::message::{self, Message};
use super::{Bitfield, PeerError, PeerResult};
use std::io::ErrorKind;
use std::net::SocketAddrV4;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Where the session currently stands. States advance strictly left to
/// right; there is no way back short of a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Handshaken,
    BitfieldReceived,
    Interested,
    Unchoked,
    Downloading,
    Closed,
}

/// A peer session over any duplex byte stream.
///
/// Generic over the stream so the protocol logic runs identically against a
/// real `TcpStream` and an in-memory pipe under test. Messages are strictly
/// serialized: one read or write at a time, never more than one request in
/// flight.
pub struct PeerSession<S> {
    stream: S,
    state: SessionState,
    info_hash: [u8; 20],
    our_id: [u8; 20],
    remote_id: Option<[u8; 20]>,
    bitfield: Option<Bitfield>,
}

impl PeerSession<TcpStream> {
    /// Opens a TCP connection to `addr`. The session starts in `Connected`;
    /// call [`PeerSession::handshake`] next.
    ///
    /// # Arguments
    /// * `addr` - The peer's address, as returned by the tracker
    /// * `info_hash` - The torrent's info digest
    /// * `our_id` - Our client's peer id
    ///
    /// # Returns
    /// * `PeerResult<Self>` - The connected session, or the connect error
    pub async fn connect(
        addr: SocketAddrV4,
        info_hash: [u8; 20],
        our_id: [u8; 20],
    ) -> PeerResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(%addr, "Connected to peer");
        Ok(Self::new(stream, info_hash, our_id))
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, info_hash: [u8; 20], our_id: [u8; 20]) -> Self {
        Self {
            stream,
            state: SessionState::Connected,
            info_hash,
            our_id,
            remote_id: None,
            bitfield: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The peer id captured from the handshake, once it has happened.
    pub fn remote_id(&self) -> Option<[u8; 20]> {
        self.remote_id
    }

    /// The peer's availability map, once it has arrived.
    pub fn bitfield(&self) -> Option<&Bitfield> {
        self.bitfield.as_ref()
    }

    /// Exchanges handshakes and captures the remote peer id.
    ///
    /// # Returns
    /// * `PeerResult<[u8; 20]>` - The peer's id on success
    ///
    /// # Errors
    /// Returns an error if the exchange fails: a short read, a wrong
    /// protocol string, or an info hash that does not match ours.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn handshake(&mut self) -> PeerResult<[u8; 20]> {
        let theirs = Handshake::exchange(&mut self.stream, self.info_hash, self.our_id).await?;
        self.remote_id = Some(theirs.peer_id);
        self.state = SessionState::Handshaken;
        tracing::debug!(remote_id = %hex::encode(theirs.peer_id), "Handshake complete");
        Ok(theirs.peer_id)
    }

    /// Reads frames until the peer's bitfield arrives.
    ///
    /// The bitfield, when present, is always the first real message after
    /// the handshake; keep-alives and any other ids that arrive first are
    /// ignored without disturbing the state machine. A peer that closes the
    /// connection instead has nothing to offer, which is reported as
    /// [`PeerError::NoPieces`].
    ///
    /// # Returns
    /// * `PeerResult<&Bitfield>` - The stored availability map, also
    ///   reachable later through [`PeerSession::bitfield`]
    pub async fn await_bitfield(&mut self) -> PeerResult<&Bitfield> {
        loop {
            let msg = match message::read_message(&mut self.stream).await {
                Ok(msg) => msg,
                Err(PeerError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(PeerError::NoPieces);
                }
                Err(e) => return Err(e),
            };
            match msg {
                Message::Bitfield(bits) => {
                    self.state = SessionState::BitfieldReceived;
                    return Ok(&*self.bitfield.insert(Bitfield::new(bits)));
                }
                other => {
                    tracing::debug!(message = other.name(), "Ignoring message before bitfield");
                }
            }
        }
    }

    /// Tells the peer we want data.
    pub async fn send_interested(&mut self) -> PeerResult<()> {
        message::write_message(&mut self.stream, &Message::Interested).await?;
        self.state = SessionState::Interested;
        Ok(())
    }

    /// Discards everything until the peer unchokes us.
    pub async fn await_unchoke(&mut self) -> PeerResult<()> {
        loop {
            match message::read_message(&mut self.stream).await? {
                Message::Unchoke => {
                    self.state = SessionState::Unchoked;
                    return Ok(());
                }
                other => {
                    tracing::debug!(message = other.name(), "Ignoring message while choked");
                }
            }
        }
    }

    /// Sends a message to the peer.
    pub async fn send(&mut self, msg: &Message) -> PeerResult<()> {
        message::write_message(&mut self.stream, msg).await
    }

    /// Receives the next message from the peer.
    pub async fn recv(&mut self) -> PeerResult<Message> {
        message::read_message(&mut self.stream).await
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Shuts the stream down and marks the session closed.
    pub async fn close(&mut self) -> PeerResult<()> {
        self.stream.shutdown().await?;
        self.state = SessionState::Closed;
        Ok(())
    }
}
