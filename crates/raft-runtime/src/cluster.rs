//! # cluster
//!
//! why: know who is in the cluster so nodes can broadcast, count quorum and find the leader
//! relations: shared by every RaftServer, owns the EventBus
//! what: Cluster registry with membership, message routing and event fan-out
//!
//! the registry holds weak references; a node that is dropped disappears from
//! the membership on the next write. its lock is always taken before a node's.

use std::sync::Arc;

use parking_lot::Mutex;
use raft_core::{NodeId, RaftEvent, RaftMessage, Role};

use crate::events::{EventBus, EventObserver};
use crate::server::{RaftServer, WeakServer};

/// Membership registry shared by all nodes of one simulated cluster
#[derive(Default)]
pub struct Cluster {
    members: Mutex<Vec<WeakServer>>,
    events: EventBus,
}

impl Cluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.events.subscribe(observer);
    }

    /// Register `server`. A follower joining while a leader exists receives a
    /// copy of the leader's log first.
    pub fn add_server(&self, server: &RaftServer) {
        let id = server.id();
        let synced_entries = {
            let mut members = self.members.lock();
            members.retain(WeakServer::is_alive);
            if members.iter().any(|member| member.id() == id) {
                tracing::warn!(node_id = id, "server already in the cluster, ignoring");
                return;
            }

            let mut synced = 0;
            if server.role() == Role::Follower && server.is_active() {
                if let Some(leader) = leader_among(&members) {
                    let entries = leader.log();
                    synced = entries.len();
                    tracing::debug!(node_id = id, leader = leader.id(), synced, "syncing log from leader");
                    server.install_log(entries);
                }
            }
            members.push(server.downgrade());
            synced
        };

        self.emit(RaftEvent::NodeJoined {
            node: id,
            synced_entries,
        });
    }

    /// Unregister `server`, failing it first if it is still active
    pub fn remove_server(&self, server: &RaftServer) {
        if server.is_active() {
            server.simulate_failure();
        }

        let id = server.id();
        let removed = {
            let mut members = self.members.lock();
            let found = members.iter().any(|member| member.id() == id);
            members.retain(|member| member.id() != id && member.is_alive());
            found
        };

        if removed {
            self.emit(RaftEvent::NodeLeft { node: id });
        } else {
            tracing::debug!(node_id = id, "server was not a member, nothing to remove");
        }
    }

    /// The first active member that believes it is leader
    pub fn current_leader(&self) -> Option<RaftServer> {
        let members = self.members.lock();
        leader_among(&members)
    }

    /// Votes needed to win with the current membership
    pub fn quorum_size(&self) -> usize {
        raft_core::node::quorum_size(self.member_count())
    }

    pub fn member_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|member| member.is_alive())
            .count()
    }

    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members
            .lock()
            .iter()
            .filter(|member| member.is_alive())
            .map(WeakServer::id)
            .collect()
    }

    pub fn is_member(&self, id: NodeId) -> bool {
        self.members
            .lock()
            .iter()
            .any(|member| member.id() == id && member.is_alive())
    }

    pub fn members(&self) -> Vec<RaftServer> {
        self.snapshot()
    }

    /// Deliver `message` to every active member except `from`.
    /// Messages from nodes outside the membership are dropped.
    pub(crate) fn broadcast(&self, from: NodeId, message: RaftMessage) {
        let peers = self.snapshot();
        if !peers.iter().any(|peer| peer.id() == from) {
            tracing::debug!(from, "dropping broadcast from non-member");
            return;
        }
        // deliver outside the registry lock
        for peer in peers {
            if peer.id() != from && peer.is_active() {
                peer.deliver(from, message.clone());
            }
        }
    }

    pub(crate) fn send(&self, from: NodeId, to: NodeId, message: RaftMessage) {
        let target = {
            let members = self.members.lock();
            if !members.iter().any(|member| member.id() == from) {
                tracing::debug!(from, to, "dropping message from non-member");
                return;
            }
            members
                .iter()
                .find(|member| member.id() == to)
                .and_then(WeakServer::upgrade)
        };

        match target {
            Some(peer) if peer.is_active() => peer.deliver(from, message),
            Some(_) => {}
            None => tracing::debug!(from, to, "dropping message for unknown node"),
        }
    }

    pub(crate) fn emit(&self, event: RaftEvent) {
        self.events.emit(event);
    }

    fn snapshot(&self) -> Vec<RaftServer> {
        self.members
            .lock()
            .iter()
            .filter_map(WeakServer::upgrade)
            .collect()
    }
}

fn leader_among(members: &[WeakServer]) -> Option<RaftServer> {
    members
        .iter()
        .filter_map(WeakServer::upgrade)
        .find(|server| server.is_active() && server.role() == Role::Leader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use raft_core::RaftConfig;
    use raft_storage::InMemoryStorage;

    fn server(cluster: &Arc<Cluster>, id: NodeId) -> RaftServer {
        RaftServer::new(id, RaftConfig::default(), InMemoryStorage::new(), cluster).unwrap()
    }

    #[test]
    fn add_and_remove_update_membership() {
        let cluster = Cluster::new();
        let a = server(&cluster, 1);
        let b = server(&cluster, 2);

        cluster.add_server(&a);
        cluster.add_server(&b);
        assert_eq!(cluster.member_ids(), vec![1, 2]);
        assert_eq!(cluster.quorum_size(), 2);

        cluster.remove_server(&a);
        assert_eq!(cluster.member_ids(), vec![2]);
        assert!(!a.is_active());
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let cluster = Cluster::new();
        let a = server(&cluster, 1);

        cluster.add_server(&a);
        cluster.add_server(&a);

        assert_eq!(cluster.member_count(), 1);
    }

    #[test]
    fn dropped_servers_leave_the_membership() {
        let cluster = Cluster::new();
        let a = server(&cluster, 1);
        {
            let b = server(&cluster, 2);
            cluster.add_server(&a);
            cluster.add_server(&b);
        }
        assert_eq!(cluster.member_ids(), vec![1]);
    }

    #[test]
    fn membership_events_are_emitted() {
        let cluster = Cluster::new();
        let log = EventLog::new();
        cluster.subscribe(log.clone());
        let a = server(&cluster, 1);

        cluster.add_server(&a);
        cluster.remove_server(&a);

        assert_eq!(
            log.events(),
            vec![
                RaftEvent::NodeJoined { node: 1, synced_entries: 0 },
                RaftEvent::NodeFailed { node: 1 },
                RaftEvent::NodeLeft { node: 1 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn messages_from_outsiders_are_dropped() {
        let cluster = Cluster::new();
        let member = server(&cluster, 1);
        let outsider = server(&cluster, 9);
        cluster.add_server(&member);
        member.start().unwrap();

        let claim = RaftMessage::Heartbeat {
            leader_id: 9,
            term: 5,
        };
        cluster.broadcast(outsider.id(), claim.clone());
        cluster.send(outsider.id(), member.id(), claim);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(member.term(), 0);
        assert_eq!(member.leader_id(), None);
        member.shutdown();
    }

    #[test]
    fn no_leader_in_fresh_cluster() {
        let cluster = Cluster::new();
        let a = server(&cluster, 1);
        cluster.add_server(&a);
        assert!(cluster.current_leader().is_none());
    }
}
