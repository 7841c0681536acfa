//! # server
//!
//! why: drive a RaftNode from timers and peer messages, one input at a time
//! relations: wraps raft_core::RaftNode, persists through raft_storage, talks to peers via cluster.rs
//! what: RaftServer handle, its mailbox actor, and the executor for node actions
//!
//! every input (peer message, election timeout, heartbeat tick) goes through
//! an unbounded mailbox drained by a single task, so the node's state machine
//! never runs twice at once. actions returned by the node are carried out
//! after its lock is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use raft_core::{
    Action, LogEntry, NodeId, NodeStatus, RaftConfig, RaftError, RaftEvent, RaftMessage, RaftNode,
    Role, Term,
};
use raft_storage::Storage;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::timer::{random_election_timeout, TimerHandle, TimerService};

/// Something for the node's actor to process
#[derive(Debug)]
enum Input {
    Message { from: NodeId, message: RaftMessage },
    ElectionTimeout { epoch: u64 },
    HeartbeatTick,
}

/// Shared handle to a running consensus node
#[derive(Clone)]
pub struct RaftServer {
    inner: Arc<ServerInner>,
}

/// Non-owning reference held by the cluster registry
#[derive(Clone)]
pub(crate) struct WeakServer {
    id: NodeId,
    inner: Weak<ServerInner>,
}

impl WeakServer {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn upgrade(&self) -> Option<RaftServer> {
        self.inner.upgrade().map(|inner| RaftServer { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

struct ServerInner {
    id: NodeId,
    config: RaftConfig,
    core: Mutex<RaftNode>,
    storage: Mutex<Box<dyn Storage>>,
    rng: Mutex<StdRng>,
    cluster: Arc<Cluster>,
    mailbox: UnboundedSender<Input>,
    /// taken by the actor on start
    inbox: Mutex<Option<UnboundedReceiver<Input>>>,
    timers: TimerService,
    election_timer: Mutex<Option<TimerHandle>>,
    heartbeat_timer: Mutex<Option<TimerHandle>>,
    /// bumped on every re-arm; timeouts carrying an older epoch are stale
    election_epoch: AtomicU64,
    stop: CancellationToken,
}

impl RaftServer {
    /// Build a node, recovering its log from `storage`. The rng is seeded from
    /// `config.seed` when present.
    pub fn new(
        id: NodeId,
        config: RaftConfig,
        storage: impl Storage + 'static,
        cluster: &Arc<Cluster>,
    ) -> Result<Self, RaftError> {
        let rng = match config.seed_for(id) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(id, config, storage, cluster, rng)
    }

    /// Build a node whose election timeouts are drawn from `rng`
    pub fn with_rng(
        id: NodeId,
        config: RaftConfig,
        storage: impl Storage + 'static,
        cluster: &Arc<Cluster>,
        rng: StdRng,
    ) -> Result<Self, RaftError> {
        let log = match storage.load_log() {
            Ok(log) => log,
            Err(error) => {
                tracing::warn!(node_id = id, %error, "could not load persisted log, starting empty");
                Vec::new()
            }
        };
        let core = RaftNode::with_log(id, config.clone(), log)?;
        if !core.log.is_empty() {
            tracing::info!(node_id = id, entries = core.log.len(), "recovered persisted log");
        }

        let (mailbox, inbox) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(ServerInner {
                id,
                config,
                core: Mutex::new(core),
                storage: Mutex::new(Box::new(storage)),
                rng: Mutex::new(rng),
                cluster: cluster.clone(),
                mailbox,
                inbox: Mutex::new(Some(inbox)),
                timers: TimerService::new(),
                election_timer: Mutex::new(None),
                heartbeat_timer: Mutex::new(None),
                election_epoch: AtomicU64::new(0),
                stop: CancellationToken::new(),
            }),
        })
    }

    /// Spawn the node's actor on the current runtime and arm its first
    /// election timer. The node stays a follower until that timer fires.
    pub fn start(&self) -> Result<(), RaftError> {
        let id = self.inner.id;
        let runtime = Handle::try_current().map_err(|_| RaftError::NoRuntime(id))?;
        if self.inner.core.lock().is_shut_down() {
            return Err(RaftError::ShutDown(id));
        }
        let inbox = self
            .inner
            .inbox
            .lock()
            .take()
            .ok_or(RaftError::AlreadyStarted(id))?;

        runtime.spawn(run_mailbox(
            Arc::downgrade(&self.inner),
            inbox,
            self.inner.stop.clone(),
        ));
        tracing::info!(node_id = id, term = self.term(), "server started as follower");
        self.inner.arm_election_timer();
        Ok(())
    }

    /// Queue a message from peer `from` for this node
    pub fn deliver(&self, from: NodeId, message: RaftMessage) {
        self.inner.enqueue(Input::Message { from, message });
    }

    /// Append a client operation; only the active leader accepts
    pub fn propose(&self, operation: impl Into<String>) -> Result<LogEntry, RaftError> {
        let (entry, actions) = self.inner.core.lock().propose(operation)?;
        self.inner.apply(actions);
        Ok(entry)
    }

    /// Simulated crash: timers stop and every later input is ignored.
    /// The node stays registered with the cluster.
    pub fn simulate_failure(&self) {
        let actions = self.inner.core.lock().fail();
        self.inner.apply(actions);
    }

    /// Stop timers and the actor for good. Safe to call more than once.
    pub fn shutdown(&self) {
        let actions = self.inner.core.lock().shut_down();
        self.inner.apply(actions);
        self.inner.timers.shutdown();
        self.inner.stop.cancel();
    }

    pub(crate) fn install_log(&self, entries: Vec<LogEntry>) {
        let truncation = self.inner.core.lock().install_log(entries);
        self.inner.apply(truncation.into_iter().collect());
    }

    pub(crate) fn downgrade(&self) -> WeakServer {
        WeakServer {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.core.lock().role
    }

    pub fn term(&self) -> Term {
        self.inner.core.lock().current_term
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.inner.core.lock().log.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.core.lock().active
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.inner.core.lock().leader_id
    }

    pub fn vote_count(&self) -> usize {
        self.inner.core.lock().vote_count()
    }

    pub fn status(&self) -> NodeStatus {
        self.inner.core.lock().status()
    }

    pub fn config(&self) -> &RaftConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for RaftServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftServer")
            .field("status", &self.status())
            .finish()
    }
}

async fn run_mailbox(
    inner: Weak<ServerInner>,
    mut inbox: UnboundedReceiver<Input>,
    stop: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            input = inbox.recv() => match input {
                Some(input) => input,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_input(input);
    }
}

impl ServerInner {
    fn enqueue(&self, input: Input) {
        // the receiver is gone only after shutdown, when inputs are moot
        let _ = self.mailbox.send(input);
    }

    fn handle_input(&self, input: Input) {
        // cluster before node, never the other way round
        let cluster_size = self.cluster.member_count();
        if let Input::ElectionTimeout { epoch } = input {
            let current = epoch == self.election_epoch.load(Ordering::SeqCst);
            if current && !self.cluster.is_member(self.id) {
                tracing::debug!(node_id = self.id, "not a cluster member, skipping election");
                self.arm_election_timer();
                return;
            }
        }
        let actions = {
            let mut core = self.core.lock();
            if !core.active {
                return;
            }
            match input {
                Input::Message { from, message } => {
                    tracing::trace!(node_id = self.id, from, ?message, "received message");
                    core.step(message, cluster_size)
                }
                Input::ElectionTimeout { epoch } => {
                    if epoch != self.election_epoch.load(Ordering::SeqCst) {
                        return;
                    }
                    tracing::debug!(node_id = self.id, term = core.current_term, "election timeout");
                    core.start_election(cluster_size)
                }
                Input::HeartbeatTick => core.heartbeat(),
            }
        };
        self.apply(actions);
    }

    /// Carry out node actions in order. Never called with the core lock held.
    fn apply(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(message) => {
                    if self.is_active() {
                        self.cluster.broadcast(self.id, message);
                    }
                }
                Action::Send { to, message } => {
                    if self.is_active() {
                        self.cluster.send(self.id, to, message);
                    }
                }
                Action::ResetElectionTimer => self.arm_election_timer(),
                Action::StartHeartbeats => {
                    self.disarm_election_timer();
                    self.start_heartbeat_timer();
                }
                Action::StopHeartbeats => self.stop_heartbeat_timer(),
                Action::CancelTimers => {
                    self.disarm_election_timer();
                    self.stop_heartbeat_timer();
                }
                Action::Persist(entries) => self.persist(&entries),
                Action::Truncate(from) => self.truncate(from),
                Action::Emit(event) => self.cluster.emit(event),
            }
        }
    }

    fn is_active(&self) -> bool {
        self.core.lock().active
    }

    fn persist(&self, entries: &[LogEntry]) {
        if let Err(error) = self.storage.lock().append_entries(entries) {
            tracing::warn!(
                node_id = self.id,
                %error,
                count = entries.len(),
                "failed to persist log entries, keeping them in memory"
            );
            self.cluster.emit(RaftEvent::PersistFailed {
                node: self.id,
                error: error.to_string(),
            });
        }
    }

    fn truncate(&self, from: usize) {
        if let Err(error) = self.storage.lock().truncate_log_from(from) {
            tracing::warn!(
                node_id = self.id,
                %error,
                from,
                "failed to truncate persisted log"
            );
            self.cluster.emit(RaftEvent::PersistFailed {
                node: self.id,
                error: error.to_string(),
            });
        }
    }

    fn arm_election_timer(&self) {
        if !self.is_active() {
            return;
        }
        let delay = random_election_timeout(&mut *self.rng.lock(), &self.config);
        let epoch = self.election_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mailbox = self.mailbox.clone();
        let timer = self.timers.schedule_once(delay, move || {
            let _ = mailbox.send(Input::ElectionTimeout { epoch });
        });
        tracing::trace!(node_id = self.id, delay_ms = delay.as_millis() as u64, "election timer armed");

        if let Some(previous) = self.election_timer.lock().replace(timer) {
            previous.cancel();
        }
    }

    fn disarm_election_timer(&self) {
        self.election_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.election_timer.lock().take() {
            timer.cancel();
        }
    }

    fn start_heartbeat_timer(&self) {
        if !self.is_active() {
            return;
        }
        let mailbox = self.mailbox.clone();
        let timer = self
            .timers
            .schedule_repeating(self.config.heartbeat_period(), move || {
                let _ = mailbox.send(Input::HeartbeatTick);
            });

        if let Some(previous) = self.heartbeat_timer.lock().replace(timer) {
            previous.cancel();
        }
    }

    fn stop_heartbeat_timer(&self) {
        if let Some(timer) = self.heartbeat_timer.lock().take() {
            timer.cancel();
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        self.timers.shutdown();
        self.stop.cancel();
    }
}
