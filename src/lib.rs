//! Library root for rbit, a minimal single-peer BitTorrent client.
//!
//! Re-exports the core subsystems: the bencode codec, metainfo parsing, the
//! tracker client, the peer protocol, and the piece download driver.
pub mod bencode;
pub mod download;
pub mod peer;
pub mod torrent;
pub mod tracker;
