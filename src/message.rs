//! Log entries, apply-channel records, and the RPC wire structures.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{LogIndex, PeerId, Term};

/// Bounds every replicated command must satisfy: cloned into RPC payloads,
/// moved across tasks, and serialized on the wire and to stable storage.
pub trait Command: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Command for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A single entry in the replicated log. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry<C> {
    /// The opaque command carried by this entry.
    pub command: C,
    /// Term in which the leader received the command.
    pub term: Term,
    /// Position of the entry in the log (1-based).
    pub index: LogIndex,
}

/// Record delivered on the apply channel once an entry commits.
///
/// `use_snapshot` and `snapshot` are reserved for log compaction and are
/// always `false`/empty in this variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplyMsg<C> {
    pub index: LogIndex,
    pub command: C,
    pub use_snapshot: bool,
    pub snapshot: Vec<u8>,
}

impl<C> ApplyMsg<C> {
    pub fn command(index: LogIndex, command: C) -> Self {
        Self {
            index,
            command,
            use_snapshot: false,
            snapshot: Vec::new(),
        }
    }
}

/// AppendEntries RPC arguments. An empty `log_entries` is a heartbeat.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesArgs<C> {
    pub term: Term,
    pub leader_id: PeerId,
    /// Index of the entry immediately preceding the new ones; 0 means
    /// "replicate from an empty log".
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub log_entries: Vec<LogEntry<C>>,
    pub leader_commit_index: LogIndex,
}

/// AppendEntries RPC reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: Term,
    /// True iff the follower's log matched at `prev_log_index`.
    pub success: bool,
    /// The responder's id, for correlating fanned-out replies.
    pub peer_index: PeerId,
    /// On success, the responder's new last log index.
    pub next_index: LogIndex,
}

/// RequestVote RPC arguments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: PeerId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// RequestVote RPC reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

/// Transport envelope for an inbound RPC.
#[derive(Debug, Serialize, Deserialize)]
pub enum Request<C> {
    AppendEntries(AppendEntriesArgs<C>),
    RequestVote(RequestVoteArgs),
}

/// Transport envelope for an RPC reply.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    AppendEntries(AppendEntriesReply),
    RequestVote(RequestVoteReply),
}
