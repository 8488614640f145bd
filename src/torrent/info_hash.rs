use super::TorrentResult;
use crate::bencode;
use sha1::{Digest, Sha1};

/// Calculates the SHA-1 digest identifying a torrent on the wire.
///
/// The digest covers the `info` dictionary's bytes exactly as they appear in
/// the metainfo file. Re-encoding the decoded tree is not guaranteed to
/// reproduce them (key order, integer canonicalization), so the hash is taken
/// over the raw slice carved out by [`bencode::raw_slice`].
///
/// # Arguments
/// * `metainfo` - The raw bytes of the whole metainfo file
///
/// # Returns
/// * `TorrentResult<[u8; 20]>` - The 20-byte SHA-1 digest, or an error if
///   the buffer has no `info` key or is not well-formed bencode
///
/// # Example
/// ```ignore
/// let metainfo = std::fs::read("sample.torrent")?;
/// let info_hash = calculate_info_hash(&metainfo)?;
/// assert_eq!(info_hash.len(), 20);
/// ```
pub fn calculate_info_hash(metainfo: &[u8]) -> TorrentResult<[u8; 20]> {
    let raw_info = bencode::raw_slice(metainfo, b"info")?;

    let mut hasher = Sha1::new();
    hasher.update(raw_info);

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&hasher.finalize());
    Ok(info_hash)
}
