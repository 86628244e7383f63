//! Replicated log consensus engine based on the Raft protocol.
//!
//! A fixed set of peers maintains a single ordered sequence of opaque
//! commands over an unreliable network: messages may be lost, delayed,
//! reordered, or duplicated, and peers may crash (non-Byzantine failures
//! only). Every peer eventually delivers the same committed prefix, in
//! order, on its apply channel.
//!
//! The core is the per-peer engine in [`peer`]: the role state machine,
//! leader election, log replication with consistency repair, and the
//! background tasks that drive heartbeats, election timers, and
//! per-follower replication streams. The network is abstracted behind
//! [`rpc::PeerClient`]; [`net`] provides a TCP implementation and
//! [`cluster`] an in-process simulated one.
//!
//! Based on "In Search of an Understandable Consensus Algorithm"
//! (Ongaro & Ousterhout).

pub mod client_api;
pub mod cluster;
pub mod config;
pub mod kv;
pub mod message;
pub mod net;
pub mod peer;
pub mod persist;
pub mod rpc;
pub mod server;
pub mod state;
pub mod types;

mod election;
mod pipeline;
mod replication;
mod timer;

pub use config::RaftConfig;
pub use message::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, Command, LogEntry, RequestVoteArgs,
    RequestVoteReply,
};
pub use peer::Peer;
pub use rpc::PeerClient;
pub use types::{LogIndex, PeerId, Term};
