//! Thin HTTP surface over the consensus log.
//!
//! Every request is replicated through the log before it is answered, Get
//! included. A write waits until its assigned index actually applies; if a
//! different command lands there (the leader was superseded mid-flight) the
//! caller is told to retry elsewhere. No linearizability is promised beyond
//! that.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{body::Bytes, Router};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use crate::kv::{KvCommand, KvResult};
use crate::peer::Peer;
use crate::types::LogIndex;

pub enum ApiResponse {
    Result(KvResult),
    NotLeader,
}

/// Requests waiting for their log index to apply, keyed by that index. The
/// expected command is kept so a superseded entry is detected instead of
/// answered with someone else's result.
pub type PendingMap = Arc<Mutex<HashMap<LogIndex, (KvCommand, oneshot::Sender<ApiResponse>)>>>;

#[derive(Clone)]
pub struct ApiState {
    pub peer: Peer<KvCommand>,
    pub pending: PendingMap,
}

/// Serve the client API until the listener fails.
pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    let app = Router::new()
        .route("/kv/{key}", get(handle_get))
        .route("/kv/{key}", put(handle_put))
        .route("/kv/{key}", delete(handle_delete))
        .with_state(state);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "client api listening");
    }
    axum::serve(listener, app).await
}

async fn handle_get(State(state): State<ApiState>, Path(key): Path<String>) -> (StatusCode, String) {
    submit(state, KvCommand::Get { key }).await
}

async fn handle_put(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    body: Bytes,
) -> (StatusCode, String) {
    let value = String::from_utf8_lossy(&body).into_owned();
    submit(state, KvCommand::Set { key, value }).await
}

async fn handle_delete(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> (StatusCode, String) {
    submit(state, KvCommand::Delete { key }).await
}

/// Feed one command into the log and wait up to 5 s for it to apply.
async fn submit(state: ApiState, command: KvCommand) -> (StatusCode, String) {
    let Some((index, _term)) = state.peer.start(command.clone()) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "not the leader".into());
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    state.pending.lock().insert(index, (command, reply_tx));

    let result = tokio::time::timeout(Duration::from_secs(5), reply_rx).await;
    if result.is_err() {
        state.pending.lock().remove(&index);
    }

    match result {
        Ok(Ok(ApiResponse::Result(KvResult::Ok))) => (StatusCode::OK, "ok".into()),
        Ok(Ok(ApiResponse::Result(KvResult::Value(Some(v))))) => (StatusCode::OK, v),
        Ok(Ok(ApiResponse::Result(KvResult::Value(None)))) => {
            (StatusCode::NOT_FOUND, String::new())
        }
        Ok(Ok(ApiResponse::NotLeader)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "superseded, retry".into())
        }
        Ok(Err(_)) | Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "timeout".into()),
    }
}
