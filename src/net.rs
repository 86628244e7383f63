//! TCP transport for peer RPCs.
//!
//! Frames are a 4-byte big-endian length prefix followed by a
//! JSON-serialized envelope. Each call dials a fresh connection, sends one
//! request, and reads one reply; every failure mode (refused, reset, slow
//! peer) collapses into `None` under the per-call timeout, which is all the
//! consensus core needs from a lossy network.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, Command, Request, RequestVoteArgs, RequestVoteReply,
    Response,
};
use crate::peer::Peer;
use crate::rpc::PeerClient;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("frame exceeds 4 GiB")]
    Oversize,
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<(), NetError> {
    let bytes = serde_json::to_vec(value)?;
    let len = u32::try_from(bytes.len()).map_err(|_| NetError::Oversize)?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T, NetError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Client endpoint for one peer, addressed by socket address.
pub struct TcpClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    async fn call<C: Command>(&self, request: Request<C>) -> Option<Response> {
        let exchange = async {
            let mut stream = TcpStream::connect(self.addr).await.ok()?;
            write_frame(&mut stream, &request).await.ok()?;
            read_frame(&mut stream).await.ok()
        };
        timeout(self.timeout, exchange).await.ok().flatten()
    }
}

#[async_trait]
impl<C: Command> PeerClient<C> for TcpClient {
    async fn append_entries(&self, args: AppendEntriesArgs<C>) -> Option<AppendEntriesReply> {
        match self.call(Request::AppendEntries(args)).await {
            Some(Response::AppendEntries(reply)) => Some(reply),
            _ => None,
        }
    }

    async fn request_vote(&self, args: RequestVoteArgs) -> Option<RequestVoteReply> {
        match self.call::<C>(Request::RequestVote(args)).await {
            Some(Response::RequestVote(reply)) => Some(reply),
            _ => None,
        }
    }
}

/// Accept inbound RPCs on `listener` and dispatch them to `peer` until the
/// listener fails. Each connection carries exactly one request/reply pair.
pub async fn serve<C: Command>(listener: TcpListener, peer: Peer<C>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let peer = peer.clone();
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(stream, &peer).await {
                        debug!(%remote, %error, "rpc connection failed");
                    }
                });
            }
            Err(error) => {
                warn!(%error, "rpc listener failed, stopping accept loop");
                return;
            }
        }
    }
}

async fn handle_connection<C: Command>(
    mut stream: TcpStream,
    peer: &Peer<C>,
) -> Result<(), NetError> {
    let request: Request<C> = read_frame(&mut stream).await?;
    let response = match request {
        Request::AppendEntries(args) => Response::AppendEntries(peer.handle_append_entries(args)),
        Request::RequestVote(args) => Response::RequestVote(peer.handle_request_vote(args)),
    };
    write_frame(&mut stream, &response).await
}
