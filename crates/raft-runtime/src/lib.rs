//! # raft-runtime
//!
//! why: run raft-core state machines as live nodes on a tokio runtime
//! relations: drives raft-core, persists through raft-storage, used by raft-sim and tests
//! what: timer service, node actor (RaftServer), cluster registry, event observers

pub mod cluster;
pub mod events;
pub mod server;
pub mod timer;

pub use cluster::Cluster;
pub use events::{EventBus, EventLog, EventObserver};
pub use server::RaftServer;
pub use timer::{random_election_timeout, TimerHandle, TimerService};
