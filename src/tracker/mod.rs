//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements the announce round trip: building the announce URL
//! with percent-encoded binary parameters, issuing the GET, and decoding the
//! bencoded reply into a compact peer list.
use crate::bencode::{self, BencodeValue};
use crate::torrent::Torrent;
use rand::Rng;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Url parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracker reply is not bencode: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("Tracker reply has no peers key")]
    MissingPeers,

    #[error("Tracker reply peers is not a compact byte string")]
    PeersNotCompact,

    #[error("Compact peer list length {0} is not a multiple of 6")]
    MalformedPeerList(usize),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Represents a client communicating with a BitTorrent tracker.
///
/// The peer id is 20 random bytes drawn once when the client is created and
/// reused for every announce and handshake of the session.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

/// Contains the parsed response from a tracker.
#[derive(Debug)]
pub struct AnnounceResponse {
    /// Peers the client can connect to, one `SocketAddrV4` per 6-byte chunk.
    pub peers: Vec<SocketAddrV4>,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker to get a list of peers.
    ///
    /// # Arguments
    /// * `torrent` - The torrent being announced; supplies the announce URL,
    ///   the info hash, and the remaining byte count
    ///
    /// # Returns
    /// * `TrackerResult<AnnounceResponse>` - The parsed peer list, or an
    ///   error if:
    ///   - The announce URL does not parse
    ///   - The HTTP round trip fails
    ///   - The reply is not bencode or lacks a usable `peers` entry
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(&self, torrent: &Torrent) -> TrackerResult<AnnounceResponse> {
        let url = self.announce_url(torrent, torrent.total_length())?;
        tracing::debug!(%url, "Making announce request to tracker");
        let response = reqwest::get(url).await?;
        let body = response.bytes().await?;
        parse_announce_response(&body)
    }

    /// Builds the announce URL. `left` is the byte count still missing;
    /// `uploaded` and `downloaded` stay zero for a fresh session.
    fn announce_url(&self, torrent: &Torrent, left: i64) -> TrackerResult<Url> {
        let mut url = Url::parse(&torrent.announce)?;
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
            percent_encode(&torrent.info_hash),
            percent_encode(&self.peer_id),
            self.port,
            left,
        );
        // The binary params are pre-encoded above; set_query leaves '%' alone.
        url.set_query(Some(&query));
        Ok(url)
    }
}

/// Decodes a bencoded tracker reply and extracts the compact peer list.
///
/// # How it works
/// 1. Decodes the reply with the bencode decoder.
/// 2. Pulls the `peers` byte string; its length must be a multiple of 6.
/// 3. Reads each 6-byte chunk as 4 bytes of network-order IPv4 address
///    followed by 2 bytes of network-order port.
///
/// Dictionary-form peer lists are not supported.
///
/// # Arguments
/// * `bytes` - The raw body of the tracker's HTTP response
///
/// # Returns
/// * `TrackerResult<AnnounceResponse>` - The peer list, or an error naming
///   which of the shapes above the reply violated
fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
    let reply = bencode::decode(bytes)?;

    let compact = match reply.dict_find(b"peers") {
        Some(BencodeValue::String(s)) => s,
        Some(_) => return Err(TrackerError::PeersNotCompact),
        None => return Err(TrackerError::MissingPeers),
    };
    if compact.len() % 6 != 0 {
        return Err(TrackerError::MalformedPeerList(compact.len()));
    }

    let peers = compact
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect();

    Ok(AnnounceResponse { peers })
}

/// Generates the 20 random bytes identifying this client for one session.
///
/// # Returns
/// * `[u8; 20]` - A fresh random peer id
///
/// # Example
/// ```ignore
/// let peer_id = generate_peer_id();
/// assert_eq!(peer_id.len(), 20);
/// ```
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    rand::rng().fill(&mut peer_id[..]);
    peer_id
}

/// Percent-encodes a byte slice for use in the announce query string.
///
/// Every byte becomes `%xx` with two lowercase hex digits, including bytes
/// that would be legal in a URL unencoded; trackers accept the long form and
/// it keeps the encoding byte-exact for the 20-byte binary parameters.
///
/// # Arguments
/// * `bytes` - The byte slice to encode
///
/// # Returns
/// * `String` - The encoded form, three characters per input byte
///
/// # Example
/// ```ignore
/// let encoded = percent_encode(&[0x12, 0xab]);
/// assert_eq!(encoded, "%12%ab");
/// ```
pub fn percent_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        encoded.push_str(&format!("%{:02x}", byte));
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_torrent() -> Torrent {
        Torrent {
            announce: "http://tracker.example/announce".to_string(),
            name: "file.bin".to_string(),
            length: 40000,
            piece_length: 16384,
            info_hash: [0x12; 20],
            pieces_hash: vec![[0u8; 20]; 3],
        }
    }

    #[test]
    fn percent_encoding_is_lowercase_two_digit_hex() {
        for byte in 0u8..=255 {
            let encoded = percent_encode(&[byte]);
            assert_eq!(encoded, format!("%{:02x}", byte));
        }
        assert_eq!(percent_encode(b"\x00\xff"), "%00%ff");
    }

    #[test]
    fn announce_url_carries_all_parameters() {
        let client = Client {
            peer_id: [0xab; 20],
            port: 6881,
        };
        let url = client.announce_url(&sample_torrent(), 40000).unwrap();
        let query = url.query().unwrap();

        assert!(query.contains(&format!("info_hash={}", "%12".repeat(20))));
        assert!(query.contains(&format!("peer_id={}", "%ab".repeat(20))));
        assert!(query.contains("port=6881"));
        assert!(query.contains("uploaded=0"));
        assert!(query.contains("downloaded=0"));
        assert!(query.contains("left=40000"));
        assert!(query.contains("compact=1"));
    }

    #[test]
    fn parses_compact_peer_list() {
        let reply = b"d8:intervali900e5:peers12:\x7f\x00\x00\x01\x1a\xe1\xc0\xa8\x01\x02\x1a\xe2e";
        let response = parse_announce_response(reply).unwrap();
        assert_eq!(
            response.peers,
            vec![
                SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881),
                SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), 6882),
            ]
        );
    }

    #[test]
    fn rejects_bad_replies() {
        assert!(matches!(
            parse_announce_response(b"not bencode"),
            Err(TrackerError::Bencode(_))
        ));
        assert!(matches!(
            parse_announce_response(b"d8:intervali900ee"),
            Err(TrackerError::MissingPeers)
        ));
        assert!(matches!(
            parse_announce_response(b"d5:peersli1eee"),
            Err(TrackerError::PeersNotCompact)
        ));
        assert!(matches!(
            parse_announce_response(b"d5:peers4:\x7f\x00\x00\x01e"),
            Err(TrackerError::MalformedPeerList(4))
        ));
    }
}
