//! # raft-core
//!
//! why: implement the raft election and replication rules as a pure, portable state machine
//! relations: driven by raft-runtime (timers, mailboxes, cluster registry), persisted via raft-storage
//! what: roles, node state machine, message and event types, configuration, errors

pub mod config;
pub mod error;
pub mod event;
pub mod log;
pub mod message;
pub mod node;

pub use config::RaftConfig;
pub use error::RaftError;
pub use event::RaftEvent;
pub use log::LogEntry;
pub use message::RaftMessage;
pub use node::{Action, NodeStatus, RaftNode, Role};

/// Identifier of a node in the cluster (always non-zero)
pub type NodeId = u64;

/// Raft logical clock
pub type Term = u64;
