//! Leader-side replication: per-follower repair loops and the periodic
//! heartbeat broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::message::{AppendEntriesArgs, Command};
use crate::peer::{Inner, PeerUpdateCmd};
use crate::state::Role;
use crate::types::PeerId;

/// Pause between retries after the network swallows a call, so a dead peer
/// does not turn the repair loop into a busy loop.
const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Long-running consumer of one follower's update queue. One of these is
/// spawned per follower at construction and lives for the peer's lifetime;
/// queue order gives per-follower FIFO replication.
pub(crate) async fn run_update_queue<C: Command>(
    inner: Arc<Inner<C>>,
    follower: PeerId,
    mut queue: mpsc::UnboundedReceiver<PeerUpdateCmd>,
) {
    while let Some(cmd) = queue.recv().await {
        if inner.killed() {
            return;
        }
        update_follower(&inner, follower, cmd).await;
    }
}

/// Drive `follower` until it acknowledges the log through `cmd.entry`, or
/// leadership is lost.
///
/// On each mismatch the probe index backs up one entry; at index 0 the
/// follower accepts unconditionally ("replicate from empty"), so the loop
/// always converges while both sides stay up. The state lock is released
/// across every RPC.
async fn update_follower<C: Command>(inner: &Arc<Inner<C>>, follower: PeerId, cmd: PeerUpdateCmd) {
    {
        let mut state = inner.state.lock();
        let Role::Leader(leader) = &mut state.role else {
            return;
        };
        leader.updating[follower.get()] = true;
    }
    debug!(me = %inner.me, %follower, target = %cmd.entry, issued = %cmd.term,
        "replicating to follower");

    loop {
        if inner.killed() {
            break;
        }

        let args = {
            let state = inner.state.lock();
            let Role::Leader(leader) = &state.role else {
                break;
            };
            if cmd.entry > state.last_log_index() {
                // The target entry is gone: leadership was lost and re-won
                // around a truncation. The command is obsolete.
                break;
            }
            let prev = leader.next_index[follower.get()];
            AppendEntriesArgs {
                term: state.current_term,
                leader_id: inner.me,
                prev_log_index: prev,
                prev_log_term: state.term_at(prev),
                log_entries: state.entries_between(prev, cmd.entry),
                leader_commit_index: state.commit_index,
            }
        };

        let reply = inner.clients[follower.get()].append_entries(args).await;

        let Some(reply) = reply else {
            // Silence from the network; retry for as long as we lead.
            let still_leader = inner.state.lock().role.is_leader();
            if !still_leader {
                break;
            }
            sleep(RETRY_DELAY).await;
            continue;
        };

        // The lock guard is not `Send`, so the outcome of holding it is
        // reduced to a plain `Step` value here, entirely before the next
        // `.await`, rather than held across one.
        enum Step {
            Stop,
            Continue,
        }

        let step = {
            let mut state = inner.state.lock();
            if reply.term > state.current_term {
                inner.become_follower(&mut state, reply.term);
                Step::Stop
            } else if !state.role.is_leader() {
                debug!(me = %inner.me, %follower, "no longer leader, abandoning replication");
                Step::Stop
            } else if reply.success {
                let (reached_target, replicated) = {
                    let Role::Leader(leader) = &mut state.role else {
                        break;
                    };
                    leader.next_index[follower.get()] = reply.next_index;
                    leader.match_index[follower.get()] = reply.next_index;
                    if reply.next_index < cmd.entry {
                        (false, 0)
                    } else {
                        let replicated = leader
                            .match_index
                            .iter()
                            .filter(|&&m| m >= cmd.entry)
                            .count();
                        (true, replicated)
                    }
                };

                if reached_target {
                    // Commits advance strictly one entry at a time, in index
                    // order: only the task whose target immediately follows the
                    // commit index may commit, once a quorum holds the entry.
                    if replicated >= inner.majority() && state.commit_index.next() == cmd.entry {
                        if let Some(i) = cmd.entry.to_array_index() {
                            let command = state.log[i].command.clone();
                            inner.emit_apply(cmd.entry, command);
                            state.commit_index = cmd.entry;
                            debug!(me = %inner.me, index = %cmd.entry, "entry committed");
                        }
                    }
                    Step::Stop
                } else {
                    Step::Continue
                }
            } else {
                // Log mismatch: back the probe up one entry and try again.
                let Role::Leader(leader) = &mut state.role else {
                    break;
                };
                let next = leader.next_index[follower.get()].prev_saturating();
                leader.next_index[follower.get()] = next;
                debug!(me = %inner.me, %follower, probe = %next, "follower log diverges, backing up");
                Step::Continue
            }
        };

        match step {
            Step::Stop => break,
            Step::Continue => {}
        }
    }

    let mut state = inner.state.lock();
    if let Role::Leader(leader) = &mut state.role {
        leader.updating[follower.get()] = false;
    }
}

/// One round of empty AppendEntries to every follower not currently being
/// repaired. Run every heartbeat period while leading, and once immediately
/// on winning an election.
///
/// Heartbeats probe at `next_index`, not the log tail, so a failed
/// consistency check here is how divergence is discovered: the reply
/// enqueues a repair command for the replication task.
pub(crate) async fn broadcast_heartbeats<C: Command>(inner: Arc<Inner<C>>) {
    let (start_term, targets) = {
        let state = inner.state.lock();
        let Role::Leader(leader) = &state.role else {
            return;
        };
        let mut targets = Vec::new();
        for id in 0..inner.clients.len() {
            if id == inner.me.get() || leader.updating[id] {
                continue;
            }
            let prev = leader.next_index[id];
            targets.push((
                PeerId::from(id),
                AppendEntriesArgs::<C> {
                    term: state.current_term,
                    leader_id: inner.me,
                    prev_log_index: prev,
                    prev_log_term: state.term_at(prev),
                    log_entries: Vec::new(),
                    leader_commit_index: state.commit_index,
                },
            ));
        }
        (state.current_term, targets)
    };

    if targets.is_empty() {
        return;
    }

    let expected = targets.len();
    let (reply_tx, mut reply_rx) = mpsc::channel(expected);
    for (id, args) in targets {
        let client = Arc::clone(&inner.clients[id.get()]);
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            let reply = client.append_entries(args).await;
            let _ = reply_tx.send((id, reply)).await;
        });
    }
    drop(reply_tx);

    for _ in 0..expected {
        let Some((follower, reply)) = reply_rx.recv().await else {
            break;
        };
        let Some(reply) = reply else {
            // Unreachable follower; the next heartbeat round retries.
            continue;
        };

        let mut state = inner.state.lock();
        if reply.term > state.current_term {
            // A partition healed and someone has moved on without us.
            inner.become_follower(&mut state, reply.term);
            continue;
        }

        if state.role.is_leader() && !reply.success && state.current_term == start_term {
            let target = state.last_log_index();
            debug!(me = %inner.me, %follower, %target,
                "heartbeat revealed divergence, scheduling repair");
            let _ = inner.updates[follower.get()].send(PeerUpdateCmd {
                entry: target,
                term: state.current_term,
            });
        }
    }
}
