//! # message
//!
//! why: define every interaction between nodes as a value, so the same logic runs in-process or over a wire
//! relations: produced and consumed by node.rs, routed by raft-runtime's cluster registry
//! what: RequestVote, VoteGranted, Heartbeat, ReplicateEntries and their json codec

use serde::{Deserialize, Serialize};

use crate::{LogEntry, NodeId, RaftError, Term};

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    /// Ask for a vote during leader election
    RequestVote { candidate_id: NodeId, term: Term },
    /// Positive answer to a vote request; rejections are silent
    VoteGranted { voter_id: NodeId, term: Term },
    /// Periodic assertion of leadership
    Heartbeat { leader_id: NodeId, term: Term },
    /// The leader's full log; followers overwrite theirs with it
    ReplicateEntries {
        leader_id: NodeId,
        term: Term,
        entries: Vec<LogEntry>,
    },
}

impl RaftMessage {
    /// Term the sender was in when it produced this message
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote { term, .. }
            | RaftMessage::VoteGranted { term, .. }
            | RaftMessage::Heartbeat { term, .. }
            | RaftMessage::ReplicateEntries { term, .. } => *term,
        }
    }

    /// Node that produced this message
    pub fn sender(&self) -> NodeId {
        match self {
            RaftMessage::RequestVote { candidate_id, .. } => *candidate_id,
            RaftMessage::VoteGranted { voter_id, .. } => *voter_id,
            RaftMessage::Heartbeat { leader_id, .. }
            | RaftMessage::ReplicateEntries { leader_id, .. } => *leader_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RaftError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RaftError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
