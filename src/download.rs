//! Piece download driver.
//!
//! Works a piece at a time on an unchoked [`PeerSession`]: request each block
//! in order, wait for the matching `piece` frame, reassemble, verify the
//! SHA-1 digest against the metainfo, and only then let the bytes reach the
//! sink. Exactly one request is in flight at any moment, so `piece` frames
//! can never arrive out of order.
use crate::peer::message::Message;
use crate::peer::session::{PeerSession, SessionState};
use crate::peer::{PeerError, PeerResult};
use crate::torrent::Torrent;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Block granularity of piece transfer. Every request asks for this many
/// bytes except the final block of a piece, which covers the remainder.
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Splits a piece into `(begin, length)` block requests.
///
/// Offsets advance by [`BLOCK_SIZE`]; the lengths sum to `piece_size`.
///
/// # Arguments
/// * `piece_size` - The byte size of the piece being tiled
///
/// # Returns
/// * `Vec<(u32, u32)>` - One `(begin, length)` pair per block, in request
///   order
///
/// # Example
/// For `piece_size = 40000` the layout is `(0, 16384)`, `(16384, 16384)`,
/// `(32768, 7232)`.
pub fn block_layout(piece_size: u32) -> Vec<(u32, u32)> {
    (0..piece_size)
        .step_by(BLOCK_SIZE as usize)
        .map(|begin| (begin, (piece_size - begin).min(BLOCK_SIZE)))
        .collect()
}

/// Downloads one piece and appends it to `sink` once verified.
///
/// # Arguments
/// * `session` - An unchoked peer session
/// * `torrent` - The metainfo the piece belongs to
/// * `index` - The piece to fetch
/// * `sink` - Where the verified bytes are appended
///
/// # Returns
/// * `PeerResult<u64>` - The number of bytes written to the sink
pub async fn download_piece<S, W>(
    session: &mut PeerSession<S>,
    torrent: &Torrent,
    index: u32,
    sink: &mut W,
) -> PeerResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let piece = fetch_piece(session, torrent, index).await?;
    sink.write_all(&piece).await?;
    sink.flush().await?;
    Ok(piece.len() as u64)
}

/// Downloads every piece the peer advertises, ascending by index, appending
/// each verified piece to `sink`.
///
/// # Arguments
/// * `session` - An unchoked peer session that has received its bitfield
/// * `torrent` - The metainfo describing the pieces
/// * `sink` - Where verified pieces are appended, in index order
///
/// # Returns
/// * `PeerResult<u64>` - The total bytes written
///
/// # Errors
/// Returns `NoPieces` if the session never received a bitfield; otherwise
/// whatever the first failing piece fetch reports.
pub async fn download_available<S, W>(
    session: &mut PeerSession<S>,
    torrent: &Torrent,
    sink: &mut W,
) -> PeerResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let indices = match session.bitfield() {
        Some(bitfield) => bitfield.available_pieces(torrent.num_pieces()),
        None => return Err(PeerError::NoPieces),
    };

    let mut written = 0u64;
    for index in indices {
        written += download_piece(session, torrent, index as u32, sink).await?;
    }
    Ok(written)
}

/// Requests, reassembles, and verifies a single piece.
///
/// # How it works
/// 1. Tiles the piece into blocks with [`block_layout`].
/// 2. For each block in order, sends one `request` and waits for the reply.
/// 3. The reply must be a `piece` frame whose index and offset match the
///    outstanding request exactly, with a payload of exactly the requested
///    length; the block lands in the piece buffer at its offset.
/// 4. After the last block, the buffer's SHA-1 digest must equal the
///    metainfo digest for this index.
///
/// # Arguments
/// * `session` - An unchoked peer session
/// * `torrent` - The metainfo supplying piece geometry and digests
/// * `index` - The piece to fetch
///
/// # Returns
/// * `PeerResult<Vec<u8>>` - The verified piece bytes
///
/// # Errors
/// Returns an error if the index is out of range, a reply does not match
/// the request, the connection drops, or the digest check fails.
#[tracing::instrument(skip(session, torrent), level = "debug")]
pub async fn fetch_piece<S>(
    session: &mut PeerSession<S>,
    torrent: &Torrent,
    index: u32,
) -> PeerResult<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let expected = *torrent
        .pieces_hash
        .get(index as usize)
        .ok_or(PeerError::PieceOutOfRange { index })?;
    let piece_size = torrent.piece_size(index as usize) as u32;

    session.set_state(SessionState::Downloading);
    let mut piece = vec![0u8; piece_size as usize];

    for (begin, length) in block_layout(piece_size) {
        session
            .send(&Message::Request {
                index,
                begin,
                length,
            })
            .await?;

        match session.recv().await? {
            Message::Piece {
                index: got_index,
                begin: got_begin,
                block,
            } => {
                if got_index != index || got_begin != begin || block.len() != length as usize {
                    return Err(PeerError::BlockMismatch {
                        index: got_index,
                        begin: got_begin,
                    });
                }
                piece[begin as usize..begin as usize + block.len()].copy_from_slice(&block);
            }
            other => {
                return Err(PeerError::UnexpectedMessage {
                    expected: "piece",
                    got: other.name(),
                });
            }
        }
    }

    let digest: [u8; 20] = Sha1::digest(&piece).into();
    if digest != expected {
        return Err(PeerError::PieceDigestMismatch { index });
    }
    tracing::debug!(index, size = piece.len(), "Piece verified");

    session.set_state(SessionState::Unchoked);
    Ok(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::handshake::Handshake;
    use crate::peer::message;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const INFO_HASH: [u8; 20] = [0x11; 20];
    const OUR_ID: [u8; 20] = [0x22; 20];

    #[test]
    fn blocks_tile_the_piece_exactly() {
        assert_eq!(
            block_layout(40000),
            vec![(0, 16384), (16384, 16384), (32768, 7232)]
        );
        assert_eq!(block_layout(16384), vec![(0, 16384)]);
        assert_eq!(block_layout(32768), vec![(0, 16384), (16384, 16384)]);
        assert_eq!(block_layout(1), vec![(0, 1)]);

        for piece_size in [1u32, 100, 16384, 16385, 40000, 65536] {
            let layout = block_layout(piece_size);
            let mut expected_begin = 0;
            for &(begin, length) in &layout {
                assert_eq!(begin, expected_begin);
                expected_begin += length;
            }
            assert_eq!(
                layout.iter().map(|&(_, len)| len).sum::<u32>(),
                piece_size
            );
        }
    }

    /// Deterministic file content for the fake peer to serve.
    fn file_content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn torrent_for(content: &[u8], piece_length: i64) -> Torrent {
        let pieces_hash = content
            .chunks(piece_length as usize)
            .map(|chunk| Sha1::digest(chunk).into())
            .collect();
        Torrent {
            announce: "http://tracker.example/ann".to_string(),
            name: "file.bin".to_string(),
            length: content.len() as i64,
            piece_length,
            info_hash: INFO_HASH,
            pieces_hash,
        }
    }

    async fn ready_session(
        stream: DuplexStream,
    ) -> PeerSession<DuplexStream> {
        let mut session = PeerSession::new(stream, INFO_HASH, OUR_ID);
        session.handshake().await.unwrap();
        session.await_bitfield().await.unwrap();
        session.send_interested().await.unwrap();
        session.await_unchoke().await.unwrap();
        session
    }

    #[tokio::test]
    async fn downloads_and_verifies_every_available_piece() {
        let content = file_content(40000);
        let torrent = torrent_for(&content, 16384);

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let piece_length = torrent.piece_length;
        let served = content.clone();
        let peer = tokio::spawn(async move {
            serve_blocks(theirs, served, vec![0b1110_0000], piece_length).await;
        });

        let mut session = ready_session(ours).await;
        let mut sink = Vec::new();
        let written = download_available(&mut session, &torrent, &mut sink)
            .await
            .unwrap();

        assert_eq!(written, 40000);
        assert_eq!(sink, content);
        drop(session);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn single_piece_lands_in_the_sink() {
        let content = file_content(40000);
        let torrent = torrent_for(&content, 16384);

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let piece_length = torrent.piece_length;
        let served = content.clone();
        let peer = tokio::spawn(async move {
            serve_blocks(theirs, served, vec![0b1110_0000], piece_length).await;
        });

        let mut session = ready_session(ours).await;
        let mut sink = Vec::new();
        let written = download_piece(&mut session, &torrent, 2, &mut sink)
            .await
            .unwrap();

        // Piece 2 is the short tail: 40000 - 2 * 16384 = 7232 bytes.
        assert_eq!(written, 7232);
        assert_eq!(sink, &content[32768..]);
        drop(session);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn corrupted_piece_fails_the_digest_check() {
        let content = file_content(16384);
        let torrent = torrent_for(&content, 16384);

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            // Serve flipped bytes so the digest cannot match.
            let mut corrupted = content.clone();
            for byte in corrupted.iter_mut() {
                *byte = !*byte;
            }
            serve_blocks(theirs, corrupted, vec![0b1000_0000], 16384).await;
        });

        let mut session = ready_session(ours).await;
        assert!(matches!(
            fetch_piece(&mut session, &torrent, 0).await,
            Err(PeerError::PieceDigestMismatch { index: 0 })
        ));
        drop(session);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_piece_index_is_rejected() {
        let content = file_content(16384);
        let torrent = torrent_for(&content, 16384);

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            serve_blocks(theirs, content, vec![0b1000_0000], 16384).await;
        });

        let mut session = ready_session(ours).await;
        assert!(matches!(
            fetch_piece(&mut session, &torrent, 5).await,
            Err(PeerError::PieceOutOfRange { index: 5 })
        ));
        drop(session);
        peer.await.unwrap();
    }

    /// Plays the remote side of a whole download: handshake, bitfield,
    /// unchoke, then serves block requests out of `content` until the
    /// client hangs up.
    async fn serve_blocks(
        mut stream: DuplexStream,
        content: Vec<u8>,
        bitfield: Vec<u8>,
        piece_length: i64,
    ) {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await.unwrap();
        let reply = Handshake::new(INFO_HASH, [0x99; 20]);
        tokio::io::AsyncWriteExt::write_all(&mut stream, &reply.serialize())
            .await
            .unwrap();

        message::write_message(&mut stream, &Message::Bitfield(bitfield))
            .await
            .unwrap();
        assert_eq!(
            message::read_message(&mut stream).await.unwrap(),
            Message::Interested
        );
        message::write_message(&mut stream, &Message::Unchoke)
            .await
            .unwrap();

        while let Ok(msg) = message::read_message(&mut stream).await {
            let (index, begin, length) = match msg {
                Message::Request {
                    index,
                    begin,
                    length,
                } => (index, begin, length),
                other => panic!("unexpected message from client: {}", other.name()),
            };
            let offset = index as usize * piece_length as usize + begin as usize;
            let block = content[offset..offset + length as usize].to_vec();
            message::write_message(
                &mut stream,
                &Message::Piece {
                    index,
                    begin,
                    block,
                },
            )
            .await
            .unwrap();
        }
    }
}
