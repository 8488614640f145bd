//! Command-line dispatcher: one subcommand per protocol stage, from decoding
//! a bencoded string up to downloading a whole file off a single peer.
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rbit::bencode;
use rbit::bencode::render;
use rbit::download;
use rbit::peer::PeerSession;
use rbit::torrent::Torrent;
use rbit::tracker::{self, Client};
use std::io::Write;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

/// Port reported to the tracker. Nothing listens on it; this client only
/// makes outbound connections.
const LISTEN_PORT: u16 = 6881;

#[derive(Parser, Debug)]
#[command(name = "rbit", about = "A minimal single-peer BitTorrent client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bencoded value and pretty-print it
    Decode {
        /// The bencoded input, e.g. d3:foo3:bare
        value: String,
    },
    /// Print the metainfo summary of a torrent file
    Info { torrent: PathBuf },
    /// Announce to the tracker and list its peers
    Peers { torrent: PathBuf },
    /// Connect to one peer and perform the handshake
    Handshake {
        torrent: PathBuf,
        /// Peer address as ip:port
        peer: SocketAddrV4,
    },
    /// Download a single piece and append it to the output file
    #[command(name = "download_piece")]
    DownloadPiece {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
        index: u32,
    },
    /// Download every piece the peer has, in ascending index order
    Download {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Decode { value } => decode_command(value.as_bytes()),
        Command::Info { torrent } => info_command(&torrent).await,
        Command::Peers { torrent } => peers_command(&torrent).await,
        Command::Handshake { torrent, peer } => handshake_command(&torrent, peer).await,
        Command::DownloadPiece {
            output,
            torrent,
            index,
        } => download_piece_command(&output, &torrent, index).await,
        Command::Download { output, torrent } => download_command(&output, &torrent).await,
    }
}

fn decode_command(input: &[u8]) -> Result<()> {
    let value = bencode::decode(input)?;
    // The display path is the one place unsorted dictionary keys are fatal.
    render::ensure_sorted_keys(&value)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&render::render(&value))?;
    stdout.write_all(b"\n")?;
    Ok(())
}

async fn load_torrent(path: &Path) -> Result<Torrent> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Torrent::from_bytes(&data)?)
}

async fn info_command(path: &Path) -> Result<()> {
    let torrent = load_torrent(path).await?;
    println!("Tracker URL: {}", torrent.announce);
    println!("Length: {}", torrent.total_length());
    println!("Info Hash: {}", hex::encode(torrent.info_hash));
    println!("Piece Length: {}", torrent.piece_length);
    println!("Piece Hashes:");
    for hash in &torrent.pieces_hash {
        println!("{}", hex::encode(hash));
    }
    Ok(())
}

async fn peers_command(path: &Path) -> Result<()> {
    let torrent = load_torrent(path).await?;
    let client = Client::new(LISTEN_PORT);
    let response = client.announce(&torrent).await?;
    for peer in &response.peers {
        println!("{peer}");
    }
    Ok(())
}

async fn handshake_command(path: &Path, peer: SocketAddrV4) -> Result<()> {
    let torrent = load_torrent(path).await?;
    let peer_id = tracker::generate_peer_id();
    let mut session = PeerSession::connect(peer, torrent.info_hash, peer_id).await?;
    let remote_id = session.handshake().await?;
    println!("Peer ID: {}", hex::encode(remote_id));
    Ok(())
}

/// Announces, connects to the first returned peer, and walks the session to
/// the unchoked state.
async fn unchoked_session(torrent: &Torrent) -> Result<PeerSession<TcpStream>> {
    let client = Client::new(LISTEN_PORT);
    let response = client.announce(torrent).await?;
    let Some(&peer) = response.peers.first() else {
        bail!("tracker returned no peers");
    };

    let mut session = PeerSession::connect(peer, torrent.info_hash, client.peer_id()).await?;
    session.handshake().await?;
    session.await_bitfield().await?;
    session.send_interested().await?;
    session.await_unchoke().await?;
    Ok(session)
}

async fn open_sink(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

async fn download_piece_command(output: &Path, path: &Path, index: u32) -> Result<()> {
    let torrent = load_torrent(path).await?;
    let mut session = unchoked_session(&torrent).await?;
    let mut sink = open_sink(output).await?;

    download::download_piece(&mut session, &torrent, index, &mut sink).await?;
    session.close().await?;

    println!("Piece {} downloaded to {}.", index, output.display());
    Ok(())
}

async fn download_command(output: &Path, path: &Path) -> Result<()> {
    let torrent = load_torrent(path).await?;
    let mut session = unchoked_session(&torrent).await?;
    let mut sink = open_sink(output).await?;

    let written = download::download_available(&mut session, &torrent, &mut sink).await?;
    session.close().await?;

    println!(
        "Downloaded {} to {} ({} bytes).",
        path.display(),
        output.display(),
        written
    );
    Ok(())
}
