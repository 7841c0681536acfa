//! # events
//!
//! why: let drivers and tests watch elections and replication without reaching into node state
//! relations: owned by cluster.rs, fed by every server's Emit actions
//! what: EventObserver trait, EventBus fan-out, EventLog recorder

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use raft_core::RaftEvent;

/// Receives every event raised in a cluster, on the thread that raised it.
/// Implementations must not call back into the cluster.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &RaftEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&RaftEvent) + Send + Sync,
{
    fn on_event(&self, event: &RaftEvent) {
        self(event)
    }
}

/// Fan-out of cluster events to subscribed observers
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl EventBus {
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().push(observer);
    }

    pub fn emit(&self, event: RaftEvent) {
        log_event(&event);
        // observers run without the list locked so they may subscribe others
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_event(&event);
        }
    }
}

fn log_event(event: &RaftEvent) {
    match event {
        RaftEvent::BecameLeader { node, term } => {
            tracing::info!(node_id = node, term, "became leader");
        }
        RaftEvent::ElectionStarted { node, term } => {
            tracing::info!(node_id = node, term, "election started");
        }
        RaftEvent::SteppedDown { node, term } => {
            tracing::info!(node_id = node, term, "stepped down to follower");
        }
        RaftEvent::NodeFailed { node } => {
            tracing::warn!(node_id = node, "node failed");
        }
        RaftEvent::PersistFailed { node, error } => {
            tracing::warn!(node_id = node, %error, "persistence failed");
        }
        RaftEvent::NodeJoined { node, synced_entries } => {
            tracing::info!(node_id = node, synced_entries, "node joined");
        }
        RaftEvent::NodeLeft { node } => {
            tracing::info!(node_id = node, "node left");
        }
        other => tracing::debug!(node_id = other.node(), event = ?other, "raft event"),
    }
}

/// Records events in arrival order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RaftEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RaftEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&RaftEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventObserver for EventLog {
    fn on_event(&self, event: &RaftEvent) {
        self.events.lock().push(event.clone());
    }
}
