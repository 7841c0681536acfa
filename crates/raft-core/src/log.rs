//! # log
//!
//! why: the unit of history the leader replicates to its followers
//! relations: appended by node.rs, copied on join by raft-runtime, persisted via raft-storage
//! what: LogEntry struct and sequence numbering helper

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position assigned by the leader that created the entry
    pub sequence_id: u64,
    /// Opaque operation payload
    pub operation: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current time
    pub fn new(sequence_id: u64, operation: impl Into<String>) -> Self {
        Self::with_timestamp(sequence_id, operation, Utc::now())
    }

    pub fn with_timestamp(
        sequence_id: u64,
        operation: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence_id,
            operation: operation.into(),
            created_at,
        }
    }
}

/// Sequence id the next appended entry should carry
pub fn next_sequence_id(log: &[LogEntry]) -> u64 {
    log.last().map(|e| e.sequence_id + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_zero() {
        assert_eq!(next_sequence_id(&[]), 0);
    }

    #[test]
    fn sequence_follows_last_entry() {
        let log = vec![LogEntry::new(0, "a"), LogEntry::new(4, "b")];
        assert_eq!(next_sequence_id(&log), 5);
    }
}
