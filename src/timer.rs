//! Timer dispatcher: one task multiplexing the randomized election timer
//! and the fixed heartbeat tick.

use std::sync::Arc;

use tokio::time::{interval, sleep_until, MissedTickBehavior};

use crate::message::Command;
use crate::peer::Inner;
use crate::{election, replication};

/// Dispatch both timers until the peer is killed.
///
/// The election timer is "reset" by the deadline in `PeerState` being
/// replaced; a wake that finds the deadline moved simply re-arms. Firing
/// while Leader only pushes the deadline forward — leadership suppresses
/// elections, and heartbeats are what keep followers quiet.
pub(crate) async fn run<C: Command>(inner: Arc<Inner<C>>) {
    let mut heartbeat = interval(inner.config.heartbeat_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if inner.killed() {
            return;
        }

        let deadline = inner.state.lock().election_deadline;
        tokio::select! {
            _ = sleep_until(deadline) => {
                maybe_start_election(&inner);
            }
            _ = heartbeat.tick() => {
                let is_leader = inner.state.lock().role.is_leader();
                if is_leader {
                    tokio::spawn(replication::broadcast_heartbeats(Arc::clone(&inner)));
                }
            }
        }
    }
}

/// Election deadline reached: become candidate and fan out, unless the
/// deadline was reset while we slept or this peer is the leader.
fn maybe_start_election<C: Command>(inner: &Arc<Inner<C>>) {
    let args = {
        let mut state = inner.state.lock();
        if state.election_deadline > tokio::time::Instant::now() {
            // Reset while we slept; sleep again toward the new deadline.
            return;
        }
        if state.role.is_leader() {
            // Suppressed while leading. Push the deadline forward so the
            // dispatcher does not spin on an expired timer.
            inner.reset_election_timer(&mut state);
            return;
        }
        inner.become_candidate(&mut state)
    };

    tokio::spawn(election::run(Arc::clone(inner), args));
}
