use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quorum::server::{self, Config};

#[derive(Parser)]
struct Args {
    /// This node's index into the peer list.
    #[arg(long)]
    me: usize,

    /// Raft RPC address of each cluster member, in cluster order, self
    /// included. Repeat for every member; the list must be identical on
    /// every node.
    #[arg(long = "peer", required = true)]
    peers: Vec<String>,

    /// TCP address for the client HTTP API.
    #[arg(long)]
    api: String,

    /// Directory for persistent state (meta.json, log.jsonl). Omit to run
    /// in-memory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut peers = Vec::with_capacity(args.peers.len());
    for raw in &args.peers {
        let addr: SocketAddr = raw
            .parse()
            .map_err(|e| format!("invalid peer addr '{raw}': {e}"))?;
        peers.push(addr);
    }
    let api_addr: SocketAddr = args
        .api
        .parse()
        .map_err(|e| format!("invalid api addr '{}': {e}", args.api))?;

    server::run(Config {
        me: args.me,
        peers,
        api_addr,
        data_dir: args.data_dir,
    })
    .await?;

    Ok(())
}
