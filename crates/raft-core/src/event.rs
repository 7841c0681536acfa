//! # event
//!
//! why: make every protocol transition observable without printing from the state machine
//! relations: emitted through node.rs actions and by raft-runtime's cluster, consumed by observers
//! what: RaftEvent enum

use serde::{Deserialize, Serialize};

use crate::{NodeId, Term};

/// A transition worth telling observers about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftEvent {
    ElectionStarted { node: NodeId, term: Term },
    VoteGranted { voter: NodeId, candidate: NodeId, term: Term },
    BecameLeader { node: NodeId, term: Term },
    SteppedDown { node: NodeId, term: Term },
    HeartbeatSent { leader: NodeId, term: Term },
    HeartbeatReceived { node: NodeId, leader: NodeId, term: Term },
    EntryAppended { node: NodeId, sequence_id: u64 },
    LogReplicated { node: NodeId, leader: NodeId, entries: usize },
    PersistFailed { node: NodeId, error: String },
    NodeJoined { node: NodeId, synced_entries: usize },
    NodeLeft { node: NodeId },
    NodeFailed { node: NodeId },
    NodeShutdown { node: NodeId },
}

impl RaftEvent {
    /// The node whose state the event describes
    pub fn node(&self) -> NodeId {
        match self {
            RaftEvent::ElectionStarted { node, .. }
            | RaftEvent::BecameLeader { node, .. }
            | RaftEvent::SteppedDown { node, .. }
            | RaftEvent::HeartbeatReceived { node, .. }
            | RaftEvent::EntryAppended { node, .. }
            | RaftEvent::LogReplicated { node, .. }
            | RaftEvent::PersistFailed { node, .. }
            | RaftEvent::NodeJoined { node, .. }
            | RaftEvent::NodeLeft { node }
            | RaftEvent::NodeFailed { node }
            | RaftEvent::NodeShutdown { node } => *node,
            RaftEvent::VoteGranted { voter, .. } => *voter,
            RaftEvent::HeartbeatSent { leader, .. } => *leader,
        }
    }
}
