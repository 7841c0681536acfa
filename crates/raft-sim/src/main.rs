//! # raft-sim
//!
//! why: watch a small cluster elect a leader, lose it, grow and replicate, from the terminal
//! relations: wires raft-runtime servers to raft-storage file stores
//! what: scripted failover and join scenario with json status output

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use raft_core::{NodeId, RaftConfig, RaftEvent};
use raft_runtime::{Cluster, RaftServer};
use raft_storage::FileStorage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "raft-sim")]
#[command(version)]
#[command(about = "In-process Raft leader election and log replication simulator")]
struct Args {
    /// JSON file with timing settings (milliseconds)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding one log store per node
    #[arg(long, default_value = "raft-data")]
    data_dir: PathBuf,

    /// Number of nodes to start with
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..))]
    nodes: u64,

    /// Seed for reproducible election timeouts
    #[arg(long)]
    seed: Option<u64>,

    /// Multiplier applied to every scripted pause
    #[arg(long, default_value = "1.0")]
    time_scale: f64,
}

impl Args {
    fn load_config(&self) -> Result<RaftConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                RaftConfig::from_json(&json)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => RaftConfig::default(),
        };
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }

    fn pause(&self, seconds: u64) -> Duration {
        Duration::from_secs(seconds).mul_f64(self.time_scale)
    }
}

struct Simulation {
    args: Args,
    config: RaftConfig,
    cluster: Arc<Cluster>,
    servers: Vec<RaftServer>,
}

impl Simulation {
    fn new(args: Args) -> Result<Self> {
        if !args.time_scale.is_finite() || args.time_scale <= 0.0 {
            bail!("--time-scale must be a positive number");
        }
        let config = args.load_config()?;
        let cluster = Cluster::new();
        cluster.subscribe(Arc::new(print_event));

        Ok(Self {
            args,
            config,
            cluster,
            servers: Vec::new(),
        })
    }

    fn spawn_node(&mut self, id: NodeId) -> Result<RaftServer> {
        let dir = self.args.data_dir.join(format!("node-{id}"));
        let storage = FileStorage::new(&dir)
            .with_context(|| format!("opening log store {}", dir.display()))?;
        let server = RaftServer::new(id, self.config.clone(), storage, &self.cluster)?;
        self.cluster.add_server(&server);
        server.start()?;
        self.servers.push(server.clone());
        Ok(server)
    }

    async fn run(&mut self) -> Result<()> {
        let count = self.args.nodes;
        for id in 1..=count {
            self.spawn_node(id)?;
        }
        tracing::info!(nodes = count, "cluster started");

        tokio::time::sleep(self.args.pause(3)).await;
        if let Some(victim) = self.servers.iter().find(|s| s.id() == count) {
            tracing::info!(node_id = count, "simulating failure");
            victim.simulate_failure();
        }

        tokio::time::sleep(self.args.pause(10)).await;
        let joiner = count + 1;
        tracing::info!(node_id = joiner, "adding node");
        self.spawn_node(joiner)?;

        tokio::time::sleep(self.args.pause(3)).await;
        match self.cluster.current_leader() {
            Some(leader) => match leader.propose("SET greeting hello") {
                Ok(entry) => tracing::info!(
                    node_id = leader.id(),
                    sequence_id = entry.sequence_id,
                    "operation proposed"
                ),
                Err(error) => tracing::warn!(%error, "proposal rejected"),
            },
            None => tracing::warn!("no leader available, skipping proposal"),
        }

        tokio::time::sleep(self.args.pause(15)).await;
        for server in &self.servers {
            println!("{}", serde_json::to_string(&server.status())?);
        }
        Ok(())
    }

    fn shutdown(&self) {
        for server in &self.servers {
            server.shutdown();
        }
    }
}

fn print_event(event: &RaftEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(error) => tracing::warn!(%error, "could not encode event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut simulation = Simulation::new(Args::parse())?;
    let outcome = simulation.run().await;
    simulation.shutdown();
    outcome
}
