//! jraft node - replicated executor front-end binary

use clap::Parser;
use jraft_core::{NodeConfig, RaftConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "jraft-node")]
#[command(about = "Replicated executor front-end node")]
struct Args {
    /// Node ID, unique in the cluster
    #[arg(long)]
    node_id: String,

    /// host:port this node is reachable at
    #[arg(long, default_value = "localhost:50051")]
    address: String,

    /// Cluster data directory
    #[arg(long, default_value = "data/")]
    data_dir: PathBuf,

    /// Bootstrap a single-node cluster
    #[arg(long)]
    bootstrap: bool,

    /// host:port of the executor
    #[arg(long, default_value = "localhost:54321")]
    executor_target: String,

    /// Endpoint that mutates executor state (repeatable)
    #[arg(long = "write-endpoint")]
    write_endpoints: Vec<String>,

    /// Write commit timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    apply_timeout_ms: u64,

    /// Make reads wait for in-flight writes
    #[arg(long)]
    exclusive_reads: bool,

    /// Heartbeat timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    heartbeat_timeout_ms: u64,

    /// Election timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    election_timeout_ms: u64,

    /// Commit timeout in milliseconds
    #[arg(long, default_value_t = 50)]
    commit_timeout_ms: u64,

    /// Maximum entries per append
    #[arg(long, default_value_t = 64)]
    max_append_entries: u64,

    /// Batch applies from concurrent writers
    #[arg(long)]
    batch_apply: bool,

    /// Keep running after being removed from the cluster
    #[arg(long)]
    no_shutdown_on_remove: bool,

    /// Log entries kept after a snapshot
    #[arg(long, default_value_t = 10240)]
    trailing_logs: u64,

    /// Seconds between snapshot checks
    #[arg(long, default_value_t = 120)]
    snapshot_interval_secs: u64,

    /// Entries since the last snapshot that trigger a new one
    #[arg(long, default_value_t = 8192)]
    snapshot_threshold: u64,

    /// Leader lease timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    leader_lease_timeout_ms: u64,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Skip restoring the latest snapshot on startup
    #[arg(long)]
    no_snapshot_restore_on_start: bool,
}

impl Args {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id,
            address: self.address,
            data_dir: self.data_dir,
            bootstrap: self.bootstrap,
            executor_target: self.executor_target,
            write_endpoints: self.write_endpoints,
            apply_timeout: Duration::from_millis(self.apply_timeout_ms),
            exclusive_reads: self.exclusive_reads,
            raft: RaftConfig {
                heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
                election_timeout: Duration::from_millis(self.election_timeout_ms),
                commit_timeout: Duration::from_millis(self.commit_timeout_ms),
                max_append_entries: self.max_append_entries,
                batch_apply: self.batch_apply,
                shutdown_on_remove: !self.no_shutdown_on_remove,
                trailing_logs: self.trailing_logs,
                snapshot_interval: Duration::from_secs(self.snapshot_interval_secs),
                snapshot_threshold: self.snapshot_threshold,
                leader_lease_timeout: Duration::from_millis(self.leader_lease_timeout_ms),
                log_level: self.log_level,
                no_snapshot_restore_on_start: self.no_snapshot_restore_on_start,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.raft.log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!(
        node_id = %config.node_id,
        address = %config.address,
        executor = %config.executor_target,
        bootstrap = config.bootstrap,
        "starting jraft node"
    );

    let node = jraft_node::start(config).await?;

    if let Err(e) = node.run_until_signal().await {
        tracing::error!(error = %e, "shutdown failed");
        std::process::exit(1);
    }

    Ok(())
}
