//! In-process cluster for exercising the consensus engine.
//!
//! Peers talk through a simulated lossy network: every call checks the
//! connectivity of both endpoints, and a severed endpoint turns calls into
//! timed-out silence, exactly what a partition looks like through the RPC
//! contract. Tests sever and heal endpoints to script elections, failover,
//! and log repair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use crate::config::RaftConfig;
use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, Command, RequestVoteArgs, RequestVoteReply,
};
use crate::peer::Peer;
use crate::persist::NullPersister;
use crate::rpc::PeerClient;
use crate::types::{LogIndex, PeerId, Term};

/// How long a failed simulated call takes, standing in for the RPC layer's
/// bounded wait. Keeps retry loops from spinning.
const FAILED_CALL_DELAY: Duration = Duration::from_millis(10);

/// Shared fabric: the registry of live peers and per-peer connectivity.
struct Fabric<C: Command> {
    peers: Mutex<Vec<Option<Peer<C>>>>,
    up: Vec<AtomicBool>,
}

impl<C: Command> Fabric<C> {
    fn link_up(&self, from: usize, to: usize) -> bool {
        self.up[from].load(Ordering::Relaxed) && self.up[to].load(Ordering::Relaxed)
    }

    fn peer(&self, id: usize) -> Option<Peer<C>> {
        self.peers.lock().get(id).cloned().flatten()
    }
}

/// Client endpoint routing calls through the fabric.
struct FabricClient<C: Command> {
    fabric: Arc<Fabric<C>>,
    from: usize,
    to: usize,
}

impl<C: Command> FabricClient<C> {
    async fn deliverable(&self) -> Option<Peer<C>> {
        if !self.fabric.link_up(self.from, self.to) {
            sleep(FAILED_CALL_DELAY).await;
            return None;
        }
        self.fabric.peer(self.to)
    }
}

#[async_trait]
impl<C: Command> PeerClient<C> for FabricClient<C> {
    async fn append_entries(&self, args: AppendEntriesArgs<C>) -> Option<AppendEntriesReply> {
        let target = self.deliverable().await?;
        Some(target.handle_append_entries(args))
    }

    async fn request_vote(&self, args: RequestVoteArgs) -> Option<RequestVoteReply> {
        let target = self.deliverable().await?;
        Some(target.handle_request_vote(args))
    }
}

/// A cluster of `n` peers wired through the simulated network.
pub struct Cluster<C: Command> {
    fabric: Arc<Fabric<C>>,
    peers: Vec<Peer<C>>,
    applies: Vec<mpsc::Receiver<ApplyMsg<C>>>,
}

impl<C: Command> Cluster<C> {
    pub fn new(n: usize) -> Self {
        Self::with_config(n, RaftConfig::default())
    }

    pub fn with_config(n: usize, config: RaftConfig) -> Self {
        let fabric = Arc::new(Fabric {
            peers: Mutex::new(vec![None; n]),
            up: (0..n).map(|_| AtomicBool::new(true)).collect(),
        });

        let mut peers = Vec::with_capacity(n);
        let mut applies = Vec::with_capacity(n);
        for me in 0..n {
            let clients: Vec<Arc<dyn PeerClient<C>>> = (0..n)
                .map(|to| {
                    Arc::new(FabricClient {
                        fabric: Arc::clone(&fabric),
                        from: me,
                        to,
                    }) as Arc<dyn PeerClient<C>>
                })
                .collect();
            let (apply_tx, apply_rx) = mpsc::channel(1024);
            let peer = Peer::make_with(
                clients,
                PeerId::from(me),
                apply_tx,
                config.clone(),
                Arc::new(NullPersister),
            );
            fabric.peers.lock()[me] = Some(peer.clone());
            peers.push(peer);
            applies.push(apply_rx);
        }

        Self {
            fabric,
            peers,
            applies,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer(&self, id: usize) -> &Peer<C> {
        &self.peers[id]
    }

    pub fn is_up(&self, id: usize) -> bool {
        self.fabric.up[id].load(Ordering::Relaxed)
    }

    /// Sever a peer from the network in both directions.
    pub fn disconnect(&self, id: usize) {
        self.fabric.up[id].store(false, Ordering::Relaxed);
    }

    /// Heal a previously severed peer.
    pub fn reconnect(&self, id: usize) {
        self.fabric.up[id].store(true, Ordering::Relaxed);
    }

    /// Ids of the connected peers currently claiming leadership, with their
    /// terms.
    pub fn leaders(&self) -> Vec<(usize, Term)> {
        self.peers
            .iter()
            .enumerate()
            .filter(|(id, _)| self.is_up(*id))
            .filter_map(|(id, peer)| {
                let (term, is_leader) = peer.get_state();
                is_leader.then_some((id, term))
            })
            .collect()
    }

    /// Wait until the connected portion of the cluster has settled on a
    /// single leader and return it.
    ///
    /// Panics if two connected peers ever claim the same term — that is an
    /// election-safety violation, never a transient.
    pub async fn wait_for_leader(&self, wait: Duration) -> Option<usize> {
        let deadline = Instant::now() + wait;
        loop {
            let leaders = self.leaders();
            for (i, &(_, term)) in leaders.iter().enumerate() {
                for &(_, other) in &leaders[i + 1..] {
                    assert_ne!(term, other, "two leaders elected in the same term");
                }
            }
            if let Some(&(id, _)) = leaders.iter().max_by_key(|(_, term)| *term) {
                if leaders.len() == 1 {
                    return Some(id);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until the connected portion of the cluster has settled: exactly
    /// one leader, every other connected peer a follower of the same term.
    /// Once this holds on a healthy network, leadership no longer moves.
    pub async fn wait_for_stable_leader(&self, wait: Duration) -> Option<usize> {
        let deadline = Instant::now() + wait;
        loop {
            let states: Vec<(usize, Term, bool)> = self
                .peers
                .iter()
                .enumerate()
                .filter(|(id, _)| self.is_up(*id))
                .map(|(id, peer)| {
                    let (term, is_leader) = peer.get_state();
                    (id, term, is_leader)
                })
                .collect();

            let leaders: Vec<_> = states.iter().filter(|(_, _, l)| *l).collect();
            if let [&(id, term, _)] = leaders.as_slice() {
                let settled = states
                    .iter()
                    .all(|&(other, other_term, _)| other == id || other_term == term);
                if settled {
                    return Some(id);
                }
            }

            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Next record from `id`'s apply channel, or `None` if `wait` elapses.
    pub async fn next_apply(&mut self, id: usize, wait: Duration) -> Option<ApplyMsg<C>> {
        timeout(wait, self.applies[id].recv()).await.ok().flatten()
    }

    /// Drain `id`'s apply channel until `index` has been delivered,
    /// checking that indices arrive strictly in order with no gaps.
    /// Returns everything received, or `None` on timeout.
    pub async fn applies_through(
        &mut self,
        id: usize,
        index: LogIndex,
        wait: Duration,
    ) -> Option<Vec<ApplyMsg<C>>> {
        let deadline = Instant::now() + wait;
        let mut received: Vec<ApplyMsg<C>> = Vec::new();
        while received.last().map(|m| m.index) != Some(index) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let msg = self.next_apply(id, remaining).await?;
            let expected = received
                .last()
                .map_or(LogIndex::from(1), |m| m.index.next());
            assert_eq!(msg.index, expected, "apply stream skipped or repeated an index");
            received.push(msg);
        }
        Some(received)
    }
}
