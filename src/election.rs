//! Election driver: fan out RequestVote and tally the returns.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{Command, RequestVoteArgs};
use crate::peer::Inner;
use crate::replication;
use crate::state::Role;

/// Run one election for the term captured in `args`.
///
/// Spawns one sender task per peer and tallies replies off a rendezvous
/// channel. The loop always runs to the last reply even after the outcome
/// is decided, so no sender task is left blocked.
pub(crate) async fn run<C: Command>(inner: Arc<Inner<C>>, args: RequestVoteArgs) {
    let start_term = args.term;

    // The candidate's own vote. In a cluster of one this is already a
    // majority.
    let mut granted = 1;
    {
        let mut state = inner.state.lock();
        if granted >= inner.majority() && matches!(state.role, Role::Candidate) {
            inner.become_leader(&mut state);
            drop(state);
            tokio::spawn(replication::broadcast_heartbeats(Arc::clone(&inner)));
            return;
        }
    }

    let (reply_tx, mut reply_rx) = mpsc::channel(inner.clients.len());
    let mut expected = 0;
    for (id, client) in inner.clients.iter().enumerate() {
        if id == inner.me.get() {
            continue;
        }
        expected += 1;
        let client = Arc::clone(client);
        let args = args.clone();
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            let reply = client.request_vote(args).await;
            let _ = reply_tx.send(reply).await;
        });
    }
    drop(reply_tx);

    for _ in 0..expected {
        let Some(reply) = reply_rx.recv().await else {
            break;
        };
        // A lost RPC is silence; the next timeout retries.
        let Some(reply) = reply else {
            continue;
        };

        let mut state = inner.state.lock();
        if state.current_term != start_term {
            // The term moved on underneath this election; keep draining
            // without acting on stale replies.
            debug!(me = %inner.me, start = %start_term, now = %state.current_term,
                "ignoring vote from a superseded election");
            continue;
        }

        if reply.vote_granted {
            if matches!(state.role, Role::Candidate) {
                granted += 1;
                debug!(me = %inner.me, term = %start_term, granted, "vote received");
                if granted == inner.majority() {
                    inner.become_leader(&mut state);
                    drop(state);
                    // Assert leadership right away; the periodic tick is up
                    // to a full heartbeat period out.
                    tokio::spawn(replication::broadcast_heartbeats(Arc::clone(&inner)));
                }
            }
        } else if reply.term > state.current_term {
            inner.become_follower(&mut state, reply.term);
        }
    }
}
