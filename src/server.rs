//! A running consensus node: TCP transport, the consensus peer, a KV state
//! machine draining the apply channel, and the client HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use crate::client_api::{self, ApiResponse, ApiState, PendingMap};
use crate::config::RaftConfig;
use crate::kv::{KvCommand, KvStore};
use crate::message::ApplyMsg;
use crate::net::{self, TcpClient};
use crate::peer::Peer;
use crate::persist::{FilePersister, NullPersister, PersistError, Persister};
use crate::rpc::PeerClient;
use crate::types::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage: {0}")]
    Persist(#[from] PersistError),
    #[error("config: {0}")]
    Config(String),
}

pub struct Config {
    /// This node's index into `peers`.
    pub me: usize,
    /// Raft RPC address of every cluster member, in cluster order,
    /// identical on every node.
    pub peers: Vec<SocketAddr>,
    /// Address for the client HTTP API.
    pub api_addr: SocketAddr,
    /// Directory for persistent state; `None` runs the in-memory variant.
    pub data_dir: Option<PathBuf>,
}

/// Build the node from `config` and run it until an I/O error stops the
/// client API.
pub async fn run(config: Config) -> Result<(), ServerError> {
    if config.me >= config.peers.len() {
        return Err(ServerError::Config(format!(
            "--me {} out of range for {} peers",
            config.me,
            config.peers.len()
        )));
    }

    let persister: Arc<dyn Persister<KvCommand>> = match &config.data_dir {
        Some(dir) => Arc::new(FilePersister::open(dir)?),
        None => Arc::new(NullPersister),
    };

    let raft_config = RaftConfig::default();
    let clients: Vec<Arc<dyn PeerClient<KvCommand>>> = config
        .peers
        .iter()
        .map(|&addr| {
            Arc::new(TcpClient::new(addr, raft_config.rpc_timeout))
                as Arc<dyn PeerClient<KvCommand>>
        })
        .collect();

    let (apply_tx, apply_rx) = mpsc::channel(1024);
    let peer = Peer::make_with(
        clients,
        PeerId::from(config.me),
        apply_tx,
        raft_config,
        persister,
    );

    let raft_listener = TcpListener::bind(config.peers[config.me]).await?;
    info!(me = config.me, addr = %config.peers[config.me], "raft rpc listening");
    tokio::spawn(net::serve(raft_listener, peer.clone()));

    let pending = PendingMap::default();
    tokio::spawn(apply_loop(apply_rx, Arc::clone(&pending)));

    let api_listener = TcpListener::bind(config.api_addr).await?;
    client_api::serve(api_listener, ApiState { peer, pending }).await?;
    Ok(())
}

/// Drain the apply channel into the KV store, answering any client request
/// that was waiting on the applied index.
async fn apply_loop(mut apply_rx: mpsc::Receiver<ApplyMsg<KvCommand>>, pending: PendingMap) {
    let mut store = KvStore::new();
    while let Some(msg) = apply_rx.recv().await {
        let result = store.apply(msg.command.clone());
        if let Some((expected, reply)) = pending.lock().remove(&msg.index) {
            let response = if expected == msg.command {
                ApiResponse::Result(result)
            } else {
                // A different leader's entry took this index; the waiting
                // client's command was lost and must be retried.
                ApiResponse::NotLeader
            };
            let _ = reply.send(response);
        }
    }
}
