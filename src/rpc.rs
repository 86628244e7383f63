//! The outbound RPC contract.

use async_trait::async_trait;

use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, Command, RequestVoteArgs, RequestVoteReply,
};

/// A client endpoint for one peer in the cluster.
///
/// The network is lossy: a call either delivers the paired request/response
/// or fails. `None` covers every failure mode — unreachable peer, lost
/// request, lost reply, timeout — and callers must treat it as silence
/// (heartbeats retry next period, the replication loop retries in place).
/// Implementations provide their own bounded wait so a call always returns.
#[async_trait]
pub trait PeerClient<C: Command>: Send + Sync {
    async fn append_entries(&self, args: AppendEntriesArgs<C>) -> Option<AppendEntriesReply>;

    async fn request_vote(&self, args: RequestVoteArgs) -> Option<RequestVoteReply>;
}
