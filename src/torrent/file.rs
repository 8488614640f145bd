//! Torrent file structure and parsing logic.
//!
//! Single-file torrents only: the metainfo view is `announce`, the file name
//! and length, the piece length, and the per-piece SHA-1 digests.
use super::{info_hash, TorrentError, TorrentResult};
use crate::bencode::{self, BencodeValue};

#[derive(Debug, PartialEq, Clone)]
pub struct Torrent {
    pub announce: String,
    pub name: String,
    pub length: i64,
    pub piece_length: i64,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

/// Splits the concatenated `pieces` string into 20-byte SHA-1 digests.
///
/// The `pieces` key of the `info` dictionary is one long byte string made of
/// back-to-back 20-byte hashes, one per piece. The digest at index `i`
/// belongs to piece `i`, so order is preserved.
///
/// # How it works
/// 1. Validates that the byte length is a multiple of 20.
/// 2. Walks the string 20 bytes at a time.
/// 3. Copies each chunk into a fixed-size `[u8; 20]` array.
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    let mut hashes = Vec::with_capacity(pieces_bytes.len() / 20);
    for chunk in pieces_bytes.chunks_exact(20) {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(chunk);
        hashes.push(hash);
    }
    Ok(hashes)
}

fn required_string(dict: &BencodeValue, key: &str) -> TorrentResult<Vec<u8>> {
    match dict.dict_find(key.as_bytes()) {
        Some(BencodeValue::String(s)) => Ok(s.clone()),
        Some(_) => Err(TorrentError::InvalidFieldType(key.to_string())),
        None => Err(TorrentError::MissingField(key.to_string())),
    }
}

fn required_integer(dict: &BencodeValue, key: &str) -> TorrentResult<i64> {
    match dict.dict_find(key.as_bytes()) {
        Some(BencodeValue::Integer(i)) => Ok(*i),
        Some(_) => Err(TorrentError::InvalidFieldType(key.to_string())),
        None => Err(TorrentError::MissingField(key.to_string())),
    }
}

impl Torrent {
    /// Parses the raw bytes of a metainfo file.
    ///
    /// Pulls `announce` and the `info` dictionary's `name`, `length`,
    /// `piece length`, and `pieces`, and computes the info digest over the
    /// raw `info` slice of `data`.
    ///
    /// # Arguments
    /// * `data` - The metainfo file's bytes, exactly as read from disk
    ///
    /// # Returns
    /// * `TorrentResult<Torrent>` - The parsed view, or an error if:
    ///   - The buffer is not a bencoded dictionary
    ///   - A required field is missing or has the wrong type
    ///   - `piece length` is not positive or `length` is negative
    ///   - The `pieces` length is not a multiple of 20
    #[tracing::instrument(skip(data), level = "debug")]
    pub fn from_bytes(data: &[u8]) -> TorrentResult<Torrent> {
        let root = bencode::decode(data)?;
        if !matches!(root, BencodeValue::Dict(_)) {
            return Err(TorrentError::InvalidFormat(
                "Root is not a dictionary".to_string(),
            ));
        }

        let announce = String::from_utf8(required_string(&root, "announce")?).map_err(|e| {
            TorrentError::InvalidFormat(format!("Invalid announce URL (not UTF-8): {}", e))
        })?;

        let info = root
            .dict_find(b"info")
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;
        if !matches!(info, BencodeValue::Dict(_)) {
            return Err(TorrentError::InvalidFieldType("info".to_string()));
        }

        let name = String::from_utf8(required_string(info, "name")?).map_err(|e| {
            TorrentError::InvalidFormat(format!("Invalid name (not UTF-8): {}", e))
        })?;

        let length = required_integer(info, "length")?;
        if length < 0 {
            return Err(TorrentError::InvalidFieldType("length".to_string()));
        }

        let piece_length = required_integer(info, "piece length")?;
        if piece_length <= 0 {
            return Err(TorrentError::InvalidFieldType("piece length".to_string()));
        }

        let pieces_hash = parse_pieces(&required_string(info, "pieces")?)?;
        let info_hash = info_hash::calculate_info_hash(data)?;

        Ok(Torrent {
            announce,
            name,
            length,
            piece_length,
            info_hash,
            pieces_hash,
        })
    }

    /// Total payload length. Single-file torrents only, so this is the
    /// `length` field directly.
    pub fn total_length(&self) -> i64 {
        self.length
    }

    /// Number of pieces, derived from the count of 20-byte digests.
    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Returns the size of a specific piece in the torrent.
    ///
    /// # How it works
    /// 1. An index past the last piece has size 0.
    /// 2. Every other piece covers `min` of the remaining bytes and the
    ///    nominal piece length, so only the last piece can come up short.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        let remaining = self.total_length() - index as i64 * self.piece_length;
        remaining.min(self.piece_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal single-file metainfo with two fabricated piece digests.
    fn sample_metainfo() -> Vec<u8> {
        let mut pieces = vec![0xabu8; 20];
        pieces.extend_from_slice(&[0xcdu8; 20]);

        let mut data = b"d8:announce18:http://tracker/ann4:infod6:lengthi24e4:name8:file.bin12:piece lengthi16e6:pieces40:".to_vec();
        data.extend_from_slice(&pieces);
        data.extend_from_slice(b"ee");
        data
    }

    #[test]
    fn parses_single_file_metainfo() {
        let torrent = Torrent::from_bytes(&sample_metainfo()).unwrap();
        assert_eq!(torrent.announce, "http://tracker/ann");
        assert_eq!(torrent.name, "file.bin");
        assert_eq!(torrent.total_length(), 24);
        assert_eq!(torrent.piece_length, 16);
        assert_eq!(torrent.num_pieces(), 2);
        assert_eq!(torrent.pieces_hash[0], [0xab; 20]);
        assert_eq!(torrent.pieces_hash[1], [0xcd; 20]);
    }

    #[test]
    fn last_piece_is_short() {
        let torrent = Torrent::from_bytes(&sample_metainfo()).unwrap();
        assert_eq!(torrent.piece_size(0), 16);
        assert_eq!(torrent.piece_size(1), 8);
        assert_eq!(torrent.piece_size(2), 0);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let no_length =
            b"d8:announce18:http://tracker/ann4:infod4:name8:file.bin12:piece lengthi16e6:pieces0:ee";
        assert!(matches!(
            Torrent::from_bytes(no_length),
            Err(TorrentError::MissingField(f)) if f == "length"
        ));

        let no_info = b"d8:announce18:http://tracker/anne";
        assert!(matches!(
            Torrent::from_bytes(no_info),
            Err(TorrentError::MissingField(f)) if f == "info"
        ));
    }

    #[test]
    fn rejects_ill_typed_fields() {
        let length_is_string =
            b"d8:announce18:http://tracker/ann4:infod6:length2:hi4:name8:file.bin12:piece lengthi16e6:pieces0:ee";
        assert!(matches!(
            Torrent::from_bytes(length_is_string),
            Err(TorrentError::InvalidFieldType(f)) if f == "length"
        ));
    }

    #[test]
    fn rejects_ragged_pieces_string() {
        let ragged =
            b"d8:announce18:http://tracker/ann4:infod6:lengthi24e4:name8:file.bin12:piece lengthi16e6:pieces3:abcee";
        assert!(matches!(
            Torrent::from_bytes(ragged),
            Err(TorrentError::InvalidPiecesHashLength)
        ));
    }
}
