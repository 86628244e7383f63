//! Core identifier types for the consensus engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonically increasing term number.
///
/// Terms act as logical clocks and are used to detect stale leaders,
/// candidates, and responses. Term 0 is the initial state before any
/// election.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    value: u64,
}

impl Term {
    pub const fn get(self) -> u64 {
        self.value
    }

    pub fn next(self) -> Term {
        Term {
            value: self.value.saturating_add(1),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.value)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Term { value }
    }
}

/// 1-based log index.
///
/// Index 0 represents "no entries" or "before the first entry"; valid
/// entries start at index 1. This is also the index carried on the apply
/// channel, so no conversion happens at the apply boundary.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogIndex {
    value: u64,
}

impl LogIndex {
    /// Create from a log length (a length is exactly the last 1-based index).
    pub fn from_length(len: usize) -> LogIndex {
        LogIndex { value: len as u64 }
    }

    pub const fn get(self) -> u64 {
        self.value
    }

    pub fn next(self) -> LogIndex {
        LogIndex {
            value: self.value.saturating_add(1),
        }
    }

    /// Step back one entry, stopping at 0 ("before the first entry").
    pub fn prev_saturating(self) -> LogIndex {
        LogIndex {
            value: self.value.saturating_sub(1),
        }
    }

    /// Convert to a 0-based array index. Returns `None` for index 0.
    pub fn to_array_index(self) -> Option<usize> {
        if self.value == 0 {
            None
        } else {
            Some((self.value - 1) as usize)
        }
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.value)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.value)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        LogIndex { value }
    }
}

/// A peer's position in the cluster's shared, ordered endpoint array.
///
/// Every server is constructed with the same array, so the index doubles as
/// the peer's cluster-wide identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    value: usize,
}

impl PeerId {
    pub const fn get(self) -> usize {
        self.value
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.value)
    }
}

impl From<usize> for PeerId {
    fn from(value: usize) -> Self {
        PeerId { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_next_increments() {
        assert_eq!(Term::default().next(), Term::from(1));
        assert_eq!(Term::from(41).next().get(), 42);
    }

    #[test]
    fn log_index_array_conversion() {
        assert!(LogIndex::default().to_array_index().is_none());
        assert_eq!(LogIndex::from(1).to_array_index(), Some(0));
        assert_eq!(LogIndex::from(5).to_array_index(), Some(4));
    }

    #[test]
    fn log_index_prev_saturates_at_zero() {
        assert_eq!(LogIndex::from(1).prev_saturating(), LogIndex::from(0));
        assert_eq!(LogIndex::from(0).prev_saturating(), LogIndex::from(0));
    }

    #[test]
    fn log_index_from_length_is_last_index() {
        assert_eq!(LogIndex::from_length(0), LogIndex::from(0));
        assert_eq!(LogIndex::from_length(3), LogIndex::from(3));
    }
}
