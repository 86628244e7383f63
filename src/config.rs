//! Timing configuration.

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

/// Protocol timing knobs.
///
/// The election timeout must sit well above the heartbeat period so a
/// healthy leader always suppresses follower elections, and the range must
/// be wide enough that simultaneous candidates rarely tie again on the next
/// round.
#[derive(Clone, Debug)]
pub struct RaftConfig {
    /// Fixed period between leader heartbeat broadcasts.
    pub heartbeat_period: Duration,
    /// Election timeouts are drawn uniformly from this range.
    pub election_timeout: Range<Duration>,
    /// Upper bound on a single outbound RPC, connect included.
    pub rpc_timeout: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_millis(100),
            election_timeout: Duration::from_millis(300)..Duration::from_millis(600),
            rpc_timeout: Duration::from_millis(200),
        }
    }
}

impl RaftConfig {
    /// Draw a fresh randomized election timeout.
    pub fn random_election_timeout(&self) -> Duration {
        let min = self.election_timeout.start.as_millis() as u64;
        let max = self.election_timeout.end.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_are_spread_above_heartbeat() {
        let config = RaftConfig::default();
        assert!(config.election_timeout.start > config.heartbeat_period * 2);
        assert!(config.election_timeout.end > config.election_timeout.start);
    }

    #[test]
    fn random_timeout_stays_in_range() {
        let config = RaftConfig::default();
        for _ in 0..100 {
            let t = config.random_election_timeout();
            assert!(config.election_timeout.contains(&t));
        }
    }
}
