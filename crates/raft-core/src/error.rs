//! # error
//!
//! why: one error type for every fallible operation a caller can hit
//! relations: returned by node.rs, config.rs, message.rs and by raft-runtime's server
//! what: RaftError

use thiserror::Error;

use crate::NodeId;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("invalid node id {0}: node ids must be non-zero")]
    InvalidNodeId(NodeId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("node {node} is not the leader (known leader: {leader:?})")]
    NotLeader { node: NodeId, leader: Option<NodeId> },

    #[error("node {0} is inactive")]
    Inactive(NodeId),

    #[error("node {0} has been shut down")]
    ShutDown(NodeId),

    #[error("node {0} is already started")]
    AlreadyStarted(NodeId),

    #[error("no async runtime available to drive node {0}")]
    NoRuntime(NodeId),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
