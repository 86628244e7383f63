//! The per-peer consensus engine.
//!
//! A [`Peer`] owns all of its consensus state behind a single mutex and a
//! set of background tasks: the timer dispatcher, one replication task per
//! follower, and the commit pipeline. RPC handlers and drivers take the
//! lock briefly and always release it across network I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RaftConfig;
use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, Command, LogEntry, RequestVoteArgs,
    RequestVoteReply,
};
use crate::persist::{NullPersister, Persister};
use crate::rpc::PeerClient;
use crate::state::{LeaderState, Role};
use crate::types::{LogIndex, PeerId, Term};
use crate::{pipeline, replication, timer};

/// Work item for a per-follower replication task: drive the follower until
/// it holds the log up to `entry`. `term` records the leader term that
/// issued the command.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PeerUpdateCmd {
    pub entry: LogIndex,
    pub term: Term,
}

/// All mutable consensus state, guarded by the peer's single mutex.
pub(crate) struct PeerState<C> {
    pub current_term: Term,
    pub voted_for: Option<PeerId>,
    pub log: Vec<LogEntry<C>>,
    /// Highest index known committed. Monotonic.
    pub commit_index: LogIndex,
    pub role: Role,
    /// When the election timer fires next. Reset by replacing the deadline.
    pub election_deadline: Instant,
}

impl<C: Command> PeerState<C> {
    pub fn last_log_index(&self) -> LogIndex {
        LogIndex::from_length(self.log.len())
    }

    pub fn last_log_term(&self) -> Term {
        self.log.last().map_or(Term::default(), |entry| entry.term)
    }

    /// Term of the entry at `index`, or term 0 for index 0 / out of range.
    pub fn term_at(&self, index: LogIndex) -> Term {
        index
            .to_array_index()
            .and_then(|i| self.log.get(i))
            .map_or(Term::default(), |entry| entry.term)
    }

    /// Entries in the index interval (`after`, `up_to`], clamped to the log.
    pub fn entries_between(&self, after: LogIndex, up_to: LogIndex) -> Vec<LogEntry<C>> {
        let start = after.get() as usize;
        let end = (up_to.get() as usize).min(self.log.len());
        if start >= end {
            return Vec::new();
        }
        self.log[start..end].to_vec()
    }
}

/// Shared core of a peer, owned by the public handle and every background
/// task.
pub(crate) struct Inner<C: Command> {
    pub me: PeerId,
    /// RPC endpoints of all peers, self included, in cluster order.
    pub clients: Vec<Arc<dyn PeerClient<C>>>,
    pub config: RaftConfig,
    pub state: Mutex<PeerState<C>>,
    /// Producer side of the commit pipeline. Unbounded so commits can be
    /// emitted while the state lock is held.
    pub commit_tx: mpsc::UnboundedSender<ApplyMsg<C>>,
    /// Per-follower update queues, indexed by peer id.
    pub updates: Vec<mpsc::UnboundedSender<PeerUpdateCmd>>,
    pub persister: Arc<dyn Persister<C>>,
    killed: AtomicBool,
}

impl<C: Command> Inner<C> {
    pub fn majority(&self) -> usize {
        self.clients.len() / 2 + 1
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    pub fn reset_election_timer(&self, state: &mut PeerState<C>) {
        state.election_deadline = Instant::now() + self.config.random_election_timeout();
    }

    /// Adopt `term` and fall back to follower, clearing the vote record.
    /// Centralized step-down: every handler and response path routes through
    /// here before further processing.
    pub fn become_follower(&self, state: &mut PeerState<C>, term: Term) {
        let changed = !matches!(state.role, Role::Follower)
            || state.current_term != term
            || state.voted_for.is_some();
        if state.role.is_leader() || state.current_term != term {
            info!(me = %self.me, old_term = %state.current_term, new_term = %term,
                "stepping down to follower");
        }
        state.role = Role::Follower;
        state.voted_for = None;
        state.current_term = term;
        if changed {
            self.persist_meta(state);
        }
    }

    /// Become candidate for a fresh term and return the vote request to fan
    /// out.
    pub fn become_candidate(&self, state: &mut PeerState<C>) -> RequestVoteArgs {
        state.current_term = state.current_term.next();
        state.voted_for = Some(self.me);
        state.role = Role::Candidate;
        self.reset_election_timer(state);
        self.persist_meta(state);
        info!(me = %self.me, term = %state.current_term, "election timeout, starting election");
        RequestVoteArgs {
            term: state.current_term,
            candidate_id: self.me,
            last_log_index: state.last_log_index(),
            last_log_term: state.last_log_term(),
        }
    }

    /// Take leadership of the current term, reinitializing replication
    /// bookkeeping. The caller is responsible for broadcasting an immediate
    /// heartbeat so followers' election timers are suppressed without
    /// waiting for the next tick.
    pub fn become_leader(&self, state: &mut PeerState<C>) {
        let last = state.last_log_index();
        info!(me = %self.me, term = %state.current_term, last_index = %last, "won election");
        state.role = Role::Leader(LeaderState::new(self.clients.len(), self.me, last));
        state.voted_for = None;
        self.persist_meta(state);
    }

    /// Push one committed entry into the commit pipeline.
    pub fn emit_apply(&self, index: LogIndex, command: C) {
        // Only fails once the pipeline task is gone, i.e. at shutdown.
        let _ = self.commit_tx.send(ApplyMsg::command(index, command));
    }

    pub fn persist_meta(&self, state: &PeerState<C>) {
        if let Err(error) = self
            .persister
            .save_meta(state.current_term, state.voted_for)
        {
            warn!(me = %self.me, %error, "failed to persist term/vote");
        }
    }

    pub fn persist_log(&self, state: &PeerState<C>) {
        if let Err(error) = self.persister.save_log(&state.log) {
            warn!(me = %self.me, %error, "failed to persist log");
        }
    }

    /// AppendEntries handler; see the module docs for the contract.
    pub fn handle_append_entries(&self, args: AppendEntriesArgs<C>) -> AppendEntriesReply {
        let mut state = self.state.lock();

        // A current-or-newer leader is accepted even without a term bump;
        // this is the one place where an equal term forces step-down.
        if args.term >= state.current_term {
            self.become_follower(&mut state, args.term);
        }

        let mut reply = AppendEntriesReply {
            term: state.current_term,
            success: false,
            peer_index: self.me,
            next_index: LogIndex::default(),
        };

        if args.term < state.current_term {
            // Stale leader; answer with our term and leave the election
            // timer alone.
            debug!(me = %self.me, from = %args.leader_id, stale = %args.term,
                current = %state.current_term, "rejecting append from old term");
            return reply;
        }

        self.reset_election_timer(&mut state);

        let prev = args.prev_log_index;
        let consistent = prev <= state.last_log_index()
            && (prev.get() == 0 || state.term_at(prev) == args.prev_log_term);
        if !consistent {
            debug!(me = %self.me, from = %args.leader_id, prev = %prev,
                len = state.log.len(), "log mismatch, rejecting append");
            return reply;
        }

        // Matched at `prev`: everything after it is superseded by the
        // leader's view.
        let had_tail = state.log.len() > prev.get() as usize;
        state.log.truncate(prev.get() as usize);
        let appended = !args.log_entries.is_empty();
        if appended {
            debug!(me = %self.me, from = %args.leader_id, count = args.log_entries.len(),
                after = %prev, "appending entries");
            state.log.extend(args.log_entries);
        }
        if had_tail || appended {
            self.persist_log(&state);
        }

        reply.success = true;
        reply.next_index = state.last_log_index();

        // Commit everything the leader has committed that we now hold.
        if args.leader_commit_index > state.commit_index {
            let new_commit = args.leader_commit_index.min(state.last_log_index());
            if new_commit > state.commit_index {
                let mut index = state.commit_index.next();
                while index <= new_commit {
                    if let Some(i) = index.to_array_index() {
                        let command = state.log[i].command.clone();
                        self.emit_apply(index, command);
                    }
                    index = index.next();
                }
                state.commit_index = new_commit;
            }
        }

        reply
    }

    /// RequestVote handler; see the module docs for the contract.
    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock();

        if args.term > state.current_term {
            self.become_follower(&mut state, args.term);
        }

        let mut reply = RequestVoteReply {
            term: state.current_term,
            vote_granted: false,
        };

        if state.voted_for.is_none() {
            let self_last_term = state.last_log_term();
            // The candidate must be at least as up-to-date: a newer last
            // term wins outright; at equal terms the longer log wins.
            let up_to_date = args.last_log_term > self_last_term
                || (args.last_log_term == self_last_term
                    && args.last_log_index >= state.last_log_index());
            if up_to_date {
                reply.vote_granted = true;
                state.voted_for = Some(args.candidate_id);
                self.persist_meta(&state);
                self.reset_election_timer(&mut state);
                debug!(me = %self.me, candidate = %args.candidate_id, term = %state.current_term,
                    "granting vote");
            }
        }

        reply
    }
}

/// Public handle to one consensus peer. Cheap to clone; all clones drive
/// the same engine.
#[derive(Clone)]
pub struct Peer<C: Command> {
    inner: Arc<Inner<C>>,
}

impl<C: Command> Peer<C> {
    /// Create a peer with default timing and no persistence.
    ///
    /// `clients` is the cluster's ordered endpoint array (identical on
    /// every server, self included), `me` indexes this peer in it, and
    /// committed commands are delivered on `apply_tx` in strict index
    /// order. Must be called from within a Tokio runtime: the peer's
    /// background tasks are spawned here.
    pub fn make(
        clients: Vec<Arc<dyn PeerClient<C>>>,
        me: PeerId,
        apply_tx: mpsc::Sender<ApplyMsg<C>>,
    ) -> Self {
        Self::make_with(
            clients,
            me,
            apply_tx,
            RaftConfig::default(),
            Arc::new(NullPersister),
        )
    }

    /// Create a peer with explicit timing and a persistence hook. Any state
    /// the persister restores is adopted before the peer starts; the peer
    /// always restarts as a follower.
    pub fn make_with(
        clients: Vec<Arc<dyn PeerClient<C>>>,
        me: PeerId,
        apply_tx: mpsc::Sender<ApplyMsg<C>>,
        config: RaftConfig,
        persister: Arc<dyn Persister<C>>,
    ) -> Self {
        let peer_count = clients.len();

        let restored = persister
            .load()
            .unwrap_or_else(|error| {
                warn!(%me, %error, "failed to restore persistent state, starting fresh");
                None
            })
            .unwrap_or_default();

        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let mut updates = Vec::with_capacity(peer_count);
        let mut update_rxs = Vec::with_capacity(peer_count);
        for _ in 0..peer_count {
            let (tx, rx) = mpsc::unbounded_channel();
            updates.push(tx);
            update_rxs.push(rx);
        }

        let state = PeerState {
            current_term: restored.current_term,
            voted_for: restored.voted_for,
            log: restored.log,
            commit_index: LogIndex::default(),
            role: Role::Follower,
            election_deadline: Instant::now() + config.random_election_timeout(),
        };

        let inner = Arc::new(Inner {
            me,
            clients,
            config,
            state: Mutex::new(state),
            commit_tx,
            updates,
            persister,
            killed: AtomicBool::new(false),
        });

        tokio::spawn(pipeline::run(commit_rx, apply_tx));
        tokio::spawn(timer::run(Arc::clone(&inner)));
        for (id, rx) in update_rxs.into_iter().enumerate() {
            if id == me.get() {
                continue;
            }
            tokio::spawn(replication::run_update_queue(
                Arc::clone(&inner),
                PeerId::from(id),
                rx,
            ));
        }

        Self { inner }
    }

    pub fn me(&self) -> PeerId {
        self.inner.me
    }

    /// Current term and whether this peer believes it is the leader.
    pub fn get_state(&self) -> (Term, bool) {
        let state = self.inner.state.lock();
        (state.current_term, state.role.is_leader())
    }

    /// Begin agreement on `command`.
    ///
    /// Returns the 1-based index the command will occupy if it ever commits
    /// and the current term, or `None` if this peer is not the leader.
    /// There is no commit guarantee: the leader may fail or be superseded.
    pub fn start(&self, command: C) -> Option<(LogIndex, Term)> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !state.role.is_leader() {
            return None;
        }

        let term = state.current_term;
        let index = state.last_log_index().next();
        state.log.push(LogEntry {
            command,
            term,
            index,
        });
        if let Role::Leader(leader) = &mut state.role {
            leader.next_index[inner.me.get()] = index;
            leader.match_index[inner.me.get()] = index;
        }
        inner.persist_log(&state);
        debug!(me = %inner.me, %index, %term, "accepted command, enqueueing replication");

        let cmd = PeerUpdateCmd { entry: index, term };
        for (id, queue) in inner.updates.iter().enumerate() {
            if id == inner.me.get() {
                continue;
            }
            // A closed queue only means the peer is shutting down.
            let _ = queue.send(cmd);
        }

        Some((index, term))
    }

    /// Best-effort shutdown hint: background tasks stop at their next
    /// opportunity. The peer answers no further timer events; inbound RPCs
    /// already in flight still complete.
    pub fn kill(&self) {
        self.inner.killed.store(true, Ordering::Relaxed);
    }

    /// Inbound AppendEntries RPC (replication and heartbeats).
    pub fn handle_append_entries(&self, args: AppendEntriesArgs<C>) -> AppendEntriesReply {
        self.inner.handle_append_entries(args)
    }

    /// Inbound RequestVote RPC.
    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        self.inner.handle_request_vote(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Endpoint that is never reachable.
    struct DownClient;

    #[async_trait]
    impl PeerClient<String> for DownClient {
        async fn append_entries(
            &self,
            _args: AppendEntriesArgs<String>,
        ) -> Option<AppendEntriesReply> {
            None
        }

        async fn request_vote(&self, _args: RequestVoteArgs) -> Option<RequestVoteReply> {
            None
        }
    }

    /// Endpoint that agrees with everything: grants votes and acknowledges
    /// appends as if its log always matched.
    struct YesClient {
        id: PeerId,
    }

    #[async_trait]
    impl PeerClient<String> for YesClient {
        async fn append_entries(
            &self,
            args: AppendEntriesArgs<String>,
        ) -> Option<AppendEntriesReply> {
            let appended = args.prev_log_index.get() + args.log_entries.len() as u64;
            Some(AppendEntriesReply {
                term: args.term,
                success: true,
                peer_index: self.id,
                next_index: LogIndex::from(appended),
            })
        }

        async fn request_vote(&self, args: RequestVoteArgs) -> Option<RequestVoteReply> {
            Some(RequestVoteReply {
                term: args.term,
                vote_granted: true,
            })
        }
    }

    /// Config whose election timer never fires during a test, so handler
    /// tests are not raced by background candidacy.
    fn quiescent_config() -> RaftConfig {
        RaftConfig {
            election_timeout: Duration::from_secs(600)..Duration::from_secs(601),
            ..RaftConfig::default()
        }
    }

    fn quiescent_peer() -> (Peer<String>, mpsc::Receiver<ApplyMsg<String>>) {
        let clients: Vec<Arc<dyn PeerClient<String>>> =
            vec![Arc::new(DownClient), Arc::new(DownClient), Arc::new(DownClient)];
        let (apply_tx, apply_rx) = mpsc::channel(64);
        let peer = Peer::make_with(
            clients,
            PeerId::from(0),
            apply_tx,
            quiescent_config(),
            Arc::new(NullPersister),
        );
        (peer, apply_rx)
    }

    fn entry(term: u64, index: u64, command: &str) -> LogEntry<String> {
        LogEntry {
            command: command.to_string(),
            term: Term::from(term),
            index: LogIndex::from(index),
        }
    }

    fn append_args(
        term: u64,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<LogEntry<String>>,
        commit: u64,
    ) -> AppendEntriesArgs<String> {
        AppendEntriesArgs {
            term: Term::from(term),
            leader_id: PeerId::from(1),
            prev_log_index: LogIndex::from(prev_index),
            prev_log_term: Term::from(prev_term),
            log_entries: entries,
            leader_commit_index: LogIndex::from(commit),
        }
    }

    #[tokio::test]
    async fn starts_as_follower_at_term_zero() {
        let (peer, _apply) = quiescent_peer();
        assert_eq!(peer.get_state(), (Term::default(), false));
    }

    #[tokio::test]
    async fn start_refused_when_not_leader() {
        let (peer, _apply) = quiescent_peer();
        assert!(peer.start("x".to_string()).is_none());
    }

    #[tokio::test]
    async fn grants_vote_to_up_to_date_candidate() {
        let (peer, _apply) = quiescent_peer();

        let reply = peer.handle_request_vote(RequestVoteArgs {
            term: Term::from(1),
            candidate_id: PeerId::from(2),
            last_log_index: LogIndex::from(0),
            last_log_term: Term::from(0),
        });

        assert!(reply.vote_granted);
        assert_eq!(reply.term, Term::from(1));
    }

    #[tokio::test]
    async fn votes_at_most_once_per_term() {
        let (peer, _apply) = quiescent_peer();

        let args = |candidate: usize| RequestVoteArgs {
            term: Term::from(1),
            candidate_id: PeerId::from(candidate),
            last_log_index: LogIndex::from(0),
            last_log_term: Term::from(0),
        };

        assert!(peer.handle_request_vote(args(1)).vote_granted);
        assert!(!peer.handle_request_vote(args(2)).vote_granted);
    }

    #[tokio::test]
    async fn rejects_vote_for_candidate_with_stale_log() {
        let (peer, _apply) = quiescent_peer();

        // Give ourselves one entry at term 2.
        peer.handle_append_entries(append_args(2, 0, 0, vec![entry(2, 1, "a")], 0));

        // Candidate's last log term is older than ours.
        let reply = peer.handle_request_vote(RequestVoteArgs {
            term: Term::from(3),
            candidate_id: PeerId::from(2),
            last_log_index: LogIndex::from(5),
            last_log_term: Term::from(1),
        });

        assert!(!reply.vote_granted);
        // The higher term was still adopted.
        assert_eq!(reply.term, Term::from(3));
    }

    #[tokio::test]
    async fn shorter_log_loses_vote_at_equal_terms() {
        let (peer, _apply) = quiescent_peer();
        peer.handle_append_entries(append_args(
            1,
            0,
            0,
            vec![entry(1, 1, "a"), entry(1, 2, "b")],
            0,
        ));

        let reply = peer.handle_request_vote(RequestVoteArgs {
            term: Term::from(2),
            candidate_id: PeerId::from(2),
            last_log_index: LogIndex::from(1),
            last_log_term: Term::from(1),
        });

        assert!(!reply.vote_granted);
    }

    #[tokio::test]
    async fn rejects_append_from_old_term() {
        let (peer, _apply) = quiescent_peer();
        peer.handle_request_vote(RequestVoteArgs {
            term: Term::from(5),
            candidate_id: PeerId::from(1),
            last_log_index: LogIndex::from(0),
            last_log_term: Term::from(0),
        });

        let reply = peer.handle_append_entries(append_args(3, 0, 0, vec![], 0));

        assert!(!reply.success);
        assert_eq!(reply.term, Term::from(5));
    }

    #[tokio::test]
    async fn rejects_append_when_prev_entry_missing() {
        let (peer, _apply) = quiescent_peer();

        // Leader claims we share an entry at index 3; our log is empty.
        let reply = peer.handle_append_entries(append_args(1, 3, 1, vec![], 0));

        assert!(!reply.success);
    }

    #[tokio::test]
    async fn rejects_append_on_prev_term_mismatch() {
        let (peer, _apply) = quiescent_peer();
        peer.handle_append_entries(append_args(1, 0, 0, vec![entry(1, 1, "a")], 0));

        let reply =
            peer.handle_append_entries(append_args(2, 1, 2, vec![entry(2, 2, "b")], 0));

        assert!(!reply.success);
    }

    #[tokio::test]
    async fn appends_and_reports_new_last_index() {
        let (peer, _apply) = quiescent_peer();

        let reply = peer.handle_append_entries(append_args(
            1,
            0,
            0,
            vec![entry(1, 1, "a"), entry(1, 2, "b")],
            0,
        ));

        assert!(reply.success);
        assert_eq!(reply.next_index, LogIndex::from(2));
    }

    #[tokio::test]
    async fn truncates_divergent_tail_on_match() {
        let (peer, _apply) = quiescent_peer();
        peer.handle_append_entries(append_args(
            1,
            0,
            0,
            vec![entry(1, 1, "a"), entry(1, 2, "stale"), entry(1, 3, "stale2")],
            0,
        ));

        // New leader matches at index 1 and supersedes the tail.
        let reply =
            peer.handle_append_entries(append_args(2, 1, 1, vec![entry(2, 2, "fresh")], 0));

        assert!(reply.success);
        assert_eq!(reply.next_index, LogIndex::from(2));
    }

    #[tokio::test]
    async fn repeated_matching_heartbeat_is_a_noop() {
        let (peer, _apply) = quiescent_peer();
        peer.handle_append_entries(append_args(1, 0, 0, vec![entry(1, 1, "a")], 0));

        for _ in 0..3 {
            let reply = peer.handle_append_entries(append_args(1, 1, 1, vec![], 0));
            assert!(reply.success);
            assert_eq!(reply.next_index, LogIndex::from(1));
        }
    }

    #[tokio::test]
    async fn follower_applies_committed_prefix_in_order() {
        let (peer, mut apply_rx) = quiescent_peer();

        peer.handle_append_entries(append_args(
            1,
            0,
            0,
            vec![entry(1, 1, "a"), entry(1, 2, "b"), entry(1, 3, "c")],
            2,
        ));

        let first = apply_rx.recv().await.expect("first apply");
        assert_eq!(first.index, LogIndex::from(1));
        assert_eq!(first.command, "a");
        assert!(!first.use_snapshot);

        let second = apply_rx.recv().await.expect("second apply");
        assert_eq!(second.index, LogIndex::from(2));
        assert_eq!(second.command, "b");

        // Index 3 is not yet committed.
        assert!(apply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn commit_index_does_not_move_backwards() {
        let (peer, mut apply_rx) = quiescent_peer();

        peer.handle_append_entries(append_args(
            1,
            0,
            0,
            vec![entry(1, 1, "a"), entry(1, 2, "b")],
            2,
        ));
        apply_rx.recv().await.expect("apply 1");
        apply_rx.recv().await.expect("apply 2");

        // A heartbeat carrying an older commit index must not re-deliver.
        peer.handle_append_entries(append_args(1, 2, 1, vec![], 1));
        assert!(apply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handlers_flush_term_vote_and_log_before_replying() {
        use crate::persist::MemoryPersister;

        let persister = Arc::new(MemoryPersister::new());
        let clients: Vec<Arc<dyn PeerClient<String>>> =
            vec![Arc::new(DownClient), Arc::new(DownClient), Arc::new(DownClient)];
        let (apply_tx, _apply_rx) = mpsc::channel(64);
        let peer = Peer::make_with(
            clients,
            PeerId::from(0),
            apply_tx,
            quiescent_config(),
            Arc::clone(&persister) as Arc<dyn Persister<String>>,
        );

        peer.handle_request_vote(RequestVoteArgs {
            term: Term::from(2),
            candidate_id: PeerId::from(1),
            last_log_index: LogIndex::from(0),
            last_log_term: Term::from(0),
        });
        let saved = persister.saved();
        assert_eq!(saved.current_term, Term::from(2));
        assert_eq!(saved.voted_for, Some(PeerId::from(1)));

        peer.handle_append_entries(append_args(3, 0, 0, vec![entry(3, 1, "a")], 0));
        let saved = persister.saved();
        assert_eq!(saved.current_term, Term::from(3));
        assert_eq!(saved.log.len(), 1);
        assert_eq!(saved.log[0].command, "a");
    }

    #[tokio::test]
    async fn wins_election_and_commits_with_agreeable_peers() {
        let clients: Vec<Arc<dyn PeerClient<String>>> = vec![
            Arc::new(DownClient),
            Arc::new(YesClient { id: PeerId::from(1) }),
            Arc::new(YesClient { id: PeerId::from(2) }),
        ];
        let (apply_tx, mut apply_rx) = mpsc::channel(64);
        let config = RaftConfig {
            election_timeout: Duration::from_millis(50)..Duration::from_millis(100),
            ..RaftConfig::default()
        };
        let peer = Peer::make_with(
            clients,
            PeerId::from(0),
            apply_tx,
            config,
            Arc::new(NullPersister),
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (_, is_leader) = peer.get_state();
            if is_leader {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "never won an election against agreeable peers"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (index, term) = peer.start("x".to_string()).expect("leader accepts commands");
        assert_eq!(index, LogIndex::from(1));
        assert!(term >= Term::from(1));

        let msg = tokio::time::timeout(Duration::from_secs(5), apply_rx.recv())
            .await
            .expect("commit within bounded time")
            .expect("apply channel open");
        assert_eq!(msg.index, LogIndex::from(1));
        assert_eq!(msg.command, "x");
    }
}
