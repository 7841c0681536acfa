//! # node
//!
//! why: define the raft node state machine and its transitions as pure reactions
//! relations: consumes message.rs, appends log.rs entries, emits event.rs events; driven by raft-runtime
//! what: Role enum, RaftNode struct, Action outputs, quorum arithmetic

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::log::next_sequence_id;
use crate::{LogEntry, NodeId, RaftConfig, RaftError, RaftEvent, RaftMessage, Term};

/// Operation carried by the entry a leader appends when it takes office
pub const NOOP_OPERATION: &str = "noop";

/// The three possible roles a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passive state - listens for heartbeats, votes when asked
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - sends heartbeats, replicates its log
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Self::Follower
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Side effect requested by the state machine. The runtime executes these
/// in order once the node's state has been fully updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver to every other active member
    Broadcast(RaftMessage),
    /// Deliver to a single member
    Send { to: NodeId, message: RaftMessage },
    /// Re-arm the election timer with a fresh random duration
    ResetElectionTimer,
    /// Cancel the election timer and start the periodic heartbeat
    StartHeartbeats,
    StopHeartbeats,
    CancelTimers,
    /// Hand entries to the persistence collaborator
    Persist(Vec<LogEntry>),
    /// Drop persisted entries from this position on; they were overwritten
    Truncate(usize),
    Emit(RaftEvent),
}

/// Minimum number of votes that wins an election among `member_count` nodes
pub fn quorum_size(member_count: usize) -> usize {
    member_count / 2 + 1
}

/// Point-in-time view of a node, for drivers and dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub role: Role,
    pub term: Term,
    pub active: bool,
    pub leader_id: Option<NodeId>,
    pub log_length: usize,
}

/// A single Raft node in the cluster
#[derive(Debug)]
pub struct RaftNode {
    /// Unique identifier for this node
    pub id: NodeId,
    pub config: RaftConfig,
    /// Current role (Follower, Candidate, or Leader)
    pub role: Role,
    /// Current term number
    pub current_term: Term,
    /// Node that received our vote in the current term (if any)
    pub voted_for: Option<NodeId>,
    /// Distinct voters backing our candidacy, self included
    pub votes_received: BTreeSet<NodeId>,
    /// Leader heard from in the current term
    pub leader_id: Option<NodeId>,
    pub log: Vec<LogEntry>,
    /// False once failed or shut down
    pub active: bool,
    shut_down: bool,
    /// Number of leading log entries already handed to persistence
    persisted: usize,
}

impl RaftNode {
    /// Create a new Raft node in Follower state with an empty log
    pub fn new(id: NodeId, config: RaftConfig) -> Result<Self, RaftError> {
        Self::with_log(id, config, Vec::new())
    }

    /// Create a node whose log is seeded from previously persisted entries
    pub fn with_log(id: NodeId, config: RaftConfig, log: Vec<LogEntry>) -> Result<Self, RaftError> {
        if id == 0 {
            return Err(RaftError::InvalidNodeId(id));
        }
        config.validate()?;
        let persisted = log.len();
        Ok(Self {
            id,
            config,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            votes_received: BTreeSet::new(),
            leader_id: None,
            log,
            active: true,
            shut_down: false,
            persisted,
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Votes collected in the current election; zero unless Candidate
    pub fn vote_count(&self) -> usize {
        if self.role == Role::Candidate {
            self.votes_received.len()
        } else {
            0
        }
    }

    pub fn has_quorum(&self, cluster_size: usize) -> bool {
        self.votes_received.len() >= quorum_size(cluster_size)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            role: self.role,
            term: self.current_term,
            active: self.active,
            leader_id: self.leader_id,
            log_length: self.log.len(),
        }
    }

    /// Dispatch an inbound message to its handler
    pub fn step(&mut self, message: RaftMessage, cluster_size: usize) -> Vec<Action> {
        match message {
            RaftMessage::RequestVote { candidate_id, term } => {
                self.handle_request_vote(candidate_id, term)
            }
            RaftMessage::VoteGranted { voter_id, term } => {
                self.handle_vote_granted(voter_id, term, cluster_size)
            }
            RaftMessage::Heartbeat { leader_id, term } => self.handle_heartbeat(leader_id, term),
            RaftMessage::ReplicateEntries { leader_id, term, entries } => {
                self.handle_replicate_entries(leader_id, term, entries)
            }
        }
    }

    /// Election timeout fired: become a candidate for the next term
    pub fn start_election(&mut self, cluster_size: usize) -> Vec<Action> {
        if !self.active || self.role == Role::Leader {
            return Vec::new();
        }

        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_received.clear();
        self.votes_received.insert(self.id);

        let mut actions = vec![
            Action::Emit(RaftEvent::ElectionStarted {
                node: self.id,
                term: self.current_term,
            }),
            Action::Broadcast(RaftMessage::RequestVote {
                candidate_id: self.id,
                term: self.current_term,
            }),
            Action::ResetElectionTimer,
        ];

        // a lone member wins on its own vote
        if self.has_quorum(cluster_size) {
            actions.extend(self.become_leader());
        }
        actions
    }

    pub fn handle_request_vote(&mut self, candidate_id: NodeId, term: Term) -> Vec<Action> {
        if !self.active {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if term > self.current_term {
            actions.extend(self.become_follower(term));
        }

        let grant = self.role == Role::Follower
            && term == self.current_term
            && self.voted_for.is_none()
            && candidate_id != self.id;
        if grant {
            self.voted_for = Some(candidate_id);
            actions.push(Action::Send {
                to: candidate_id,
                message: RaftMessage::VoteGranted {
                    voter_id: self.id,
                    term,
                },
            });
            actions.push(Action::ResetElectionTimer);
            actions.push(Action::Emit(RaftEvent::VoteGranted {
                voter: self.id,
                candidate: candidate_id,
                term,
            }));
        }
        actions
    }

    pub fn handle_vote_granted(
        &mut self,
        voter_id: NodeId,
        term: Term,
        cluster_size: usize,
    ) -> Vec<Action> {
        if !self.active || self.role != Role::Candidate || term != self.current_term {
            return Vec::new();
        }

        self.votes_received.insert(voter_id);
        if self.has_quorum(cluster_size) {
            self.become_leader()
        } else {
            Vec::new()
        }
    }

    /// Step down to follower, adopting `term` if it is newer
    pub fn become_follower(&mut self, term: Term) -> Vec<Action> {
        let previous = self.role;
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        self.role = Role::Follower;
        self.votes_received.clear();

        let mut actions = Vec::new();
        if previous == Role::Leader {
            actions.push(Action::StopHeartbeats);
            actions.push(Action::ResetElectionTimer);
        }
        if previous != Role::Follower {
            actions.push(Action::Emit(RaftEvent::SteppedDown {
                node: self.id,
                term: self.current_term,
            }));
        }
        actions
    }

    fn become_leader(&mut self) -> Vec<Action> {
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.votes_received.clear();

        let entry = LogEntry::new(next_sequence_id(&self.log), NOOP_OPERATION);
        let sequence_id = entry.sequence_id;
        self.log.push(entry);

        let mut actions = vec![
            Action::Emit(RaftEvent::BecameLeader {
                node: self.id,
                term: self.current_term,
            }),
            Action::Emit(RaftEvent::EntryAppended {
                node: self.id,
                sequence_id,
            }),
        ];
        actions.extend(self.take_unpersisted());
        actions.push(Action::StartHeartbeats);
        actions.extend(self.heartbeat());
        actions.extend(self.replicate());
        actions
    }

    /// One round of the leader's periodic heartbeat
    pub fn heartbeat(&self) -> Vec<Action> {
        if !self.active || self.role != Role::Leader {
            return Vec::new();
        }
        vec![
            Action::Broadcast(RaftMessage::Heartbeat {
                leader_id: self.id,
                term: self.current_term,
            }),
            Action::Emit(RaftEvent::HeartbeatSent {
                leader: self.id,
                term: self.current_term,
            }),
        ]
    }

    /// Ship the full log to every follower
    pub fn replicate(&self) -> Vec<Action> {
        if !self.active || self.role != Role::Leader {
            return Vec::new();
        }
        vec![Action::Broadcast(RaftMessage::ReplicateEntries {
            leader_id: self.id,
            term: self.current_term,
            entries: self.log.clone(),
        })]
    }

    pub fn handle_heartbeat(&mut self, leader_id: NodeId, term: Term) -> Vec<Action> {
        if !self.active || term < self.current_term {
            return Vec::new();
        }
        let Some(mut actions) = self.accept_leader(leader_id, term) else {
            return Vec::new();
        };
        actions.push(Action::Emit(RaftEvent::HeartbeatReceived {
            node: self.id,
            leader: leader_id,
            term,
        }));
        actions
    }

    pub fn handle_replicate_entries(
        &mut self,
        leader_id: NodeId,
        term: Term,
        entries: Vec<LogEntry>,
    ) -> Vec<Action> {
        if !self.active || term < self.current_term {
            return Vec::new();
        }
        let Some(mut actions) = self.accept_leader(leader_id, term) else {
            return Vec::new();
        };
        let count = entries.len();
        actions.extend(self.install_log(entries));
        actions.push(Action::Emit(RaftEvent::LogReplicated {
            node: self.id,
            leader: leader_id,
            entries: count,
        }));
        actions
    }

    /// Recognise `leader_id` as leader of `term` (already checked to be >= ours).
    /// Returns None when the claim conflicts with our own leadership.
    fn accept_leader(&mut self, leader_id: NodeId, term: Term) -> Option<Vec<Action>> {
        if self.role == Role::Leader && term == self.current_term {
            tracing::warn!(
                node_id = self.id,
                other = leader_id,
                term,
                "ignoring second leader claim for our own term"
            );
            return None;
        }

        let mut actions = Vec::new();
        if term > self.current_term || self.role == Role::Candidate {
            actions.extend(self.become_follower(term));
        }
        self.leader_id = Some(leader_id);
        actions.push(Action::ResetElectionTimer);
        Some(actions)
    }

    /// Replace the whole log with `entries` (replication or join-time sync).
    /// Returns a truncation when persisted entries no longer match the log.
    pub fn install_log(&mut self, entries: Vec<LogEntry>) -> Option<Action> {
        let common = self
            .log
            .iter()
            .zip(&entries)
            .take_while(|(ours, theirs)| ours == theirs)
            .count();
        self.log = entries;
        if common >= self.persisted {
            return None;
        }
        self.persisted = common;
        Some(Action::Truncate(common))
    }

    /// Append a client operation (leader only) and replicate it
    pub fn propose(
        &mut self,
        operation: impl Into<String>,
    ) -> Result<(LogEntry, Vec<Action>), RaftError> {
        if self.shut_down {
            return Err(RaftError::ShutDown(self.id));
        }
        if !self.active {
            return Err(RaftError::Inactive(self.id));
        }
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                node: self.id,
                leader: self.leader_id,
            });
        }

        let entry = LogEntry::new(next_sequence_id(&self.log), operation);
        self.log.push(entry.clone());

        let mut actions = vec![Action::Emit(RaftEvent::EntryAppended {
            node: self.id,
            sequence_id: entry.sequence_id,
        })];
        actions.extend(self.take_unpersisted());
        actions.extend(self.replicate());
        Ok((entry, actions))
    }

    fn take_unpersisted(&mut self) -> Option<Action> {
        if self.persisted >= self.log.len() {
            return None;
        }
        let pending = self.log[self.persisted..].to_vec();
        self.persisted = self.log.len();
        Some(Action::Persist(pending))
    }

    /// Simulated crash: stop all timers and ignore everything from now on
    pub fn fail(&mut self) -> Vec<Action> {
        if !self.active {
            return Vec::new();
        }
        self.active = false;
        vec![
            Action::CancelTimers,
            Action::Emit(RaftEvent::NodeFailed { node: self.id }),
        ]
    }

    pub fn shut_down(&mut self) -> Vec<Action> {
        if self.shut_down {
            return Vec::new();
        }
        self.active = false;
        self.shut_down = true;
        vec![
            Action::CancelTimers,
            Action::Emit(RaftEvent::NodeShutdown { node: self.id }),
        ]
    }
}
