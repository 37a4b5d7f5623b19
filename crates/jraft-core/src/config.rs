//! Configuration types for jraft

use crate::error::StartupError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a jraft node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id used by the consensus log
    pub node_id: String,

    /// host:port this node is reachable at (data, admin and raft RPC)
    pub address: String,

    /// Root of the cluster data directory; this node uses `<data_dir>/<node_id>`
    pub data_dir: PathBuf,

    /// Bootstrap a single-voter cluster made of this node on startup
    pub bootstrap: bool,

    /// host:port of the underlying executor
    pub executor_target: String,

    /// Endpoints that mutate executor state and must go through the log
    pub write_endpoints: Vec<String>,

    /// Upper bound on how long a write waits for commit and apply
    #[serde(with = "duration_millis")]
    pub apply_timeout: Duration,

    /// Make reads wait for an in-flight apply
    pub exclusive_reads: bool,

    /// Consensus log configuration
    pub raft: RaftConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            address: "localhost:50051".to_string(),
            data_dir: PathBuf::from("data/"),
            bootstrap: false,
            executor_target: "localhost:54321".to_string(),
            write_endpoints: Vec::new(),
            apply_timeout: Duration::from_secs(1),
            exclusive_reads: false,
            raft: RaftConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Check the settings that would otherwise fail deep inside startup
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.node_id.is_empty() {
            return Err(StartupError::Config("node id is required".into()));
        }
        self.port()?;
        if self.apply_timeout.is_zero() {
            return Err(StartupError::Config("apply timeout must be positive".into()));
        }
        self.raft.validate()
    }

    /// Port part of `address`
    pub fn port(&self) -> Result<u16, StartupError> {
        let (_, port) = self.address.rsplit_once(':').ok_or_else(|| {
            StartupError::Config(format!("failed to parse local address ({:?})", self.address))
        })?;
        port.parse().map_err(|_| {
            StartupError::Config(format!("failed to parse local address ({:?})", self.address))
        })
    }

    /// Host part of `address`
    pub fn host(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address)
    }

    /// Directory holding this node's log store and snapshot
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir.join(&self.node_id)
    }
}

/// Consensus log tuning, passed through to the log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Follower timeout before it starts an election
    #[serde(with = "duration_millis")]
    pub heartbeat_timeout: Duration,

    /// Candidate timeout before it restarts an election
    #[serde(with = "duration_millis")]
    pub election_timeout: Duration,

    /// Idle time before the leader flushes commit progress
    #[serde(with = "duration_millis")]
    pub commit_timeout: Duration,

    /// Maximum entries per AppendEntries RPC
    pub max_append_entries: u64,

    /// Batch applies coming from concurrent writers
    pub batch_apply: bool,

    /// Stop the node once it is removed from the configuration
    pub shutdown_on_remove: bool,

    /// Log entries kept after a snapshot, for slow followers
    pub trailing_logs: u64,

    /// How often to check whether a snapshot is due
    #[serde(with = "duration_secs")]
    pub snapshot_interval: Duration,

    /// Entries since the last snapshot that trigger a new one
    pub snapshot_threshold: u64,

    /// How long a leader stays leader without contact from a quorum
    #[serde(with = "duration_millis")]
    pub leader_lease_timeout: Duration,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Skip restoring the latest snapshot on startup
    pub no_snapshot_restore_on_start: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(1000),
            election_timeout: Duration::from_millis(1000),
            commit_timeout: Duration::from_millis(50),
            max_append_entries: 64,
            batch_apply: false,
            shutdown_on_remove: true,
            trailing_logs: 10240,
            snapshot_interval: Duration::from_secs(120),
            snapshot_threshold: 8192,
            leader_lease_timeout: Duration::from_millis(500),
            log_level: "info".to_string(),
            no_snapshot_restore_on_start: false,
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.heartbeat_timeout.is_zero() || self.election_timeout.is_zero() {
            return Err(StartupError::Config(
                "heartbeat and election timeouts must be positive".into(),
            ));
        }
        if self.max_append_entries == 0 {
            return Err(StartupError::Config("max append entries must be positive".into()));
        }
        if self.snapshot_threshold == 0 {
            return Err(StartupError::Config("snapshot threshold must be positive".into()));
        }
        Ok(())
    }
}

// Serde helpers for Duration
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str, address: &str) -> NodeConfig {
        NodeConfig {
            node_id: id.to_string(),
            address: address.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_id_required() {
        assert!(matches!(
            config("", "localhost:50051").validate(),
            Err(StartupError::Config(_))
        ));
        assert!(config("1", "localhost:50051").validate().is_ok());
    }

    #[test]
    fn test_address_parts() {
        let cfg = config("1", "10.0.0.1:50051");
        assert_eq!(cfg.host(), "10.0.0.1");
        assert_eq!(cfg.port().unwrap(), 50051);
        assert!(config("1", "no-port").validate().is_err());
        assert!(config("1", "host:notaport").validate().is_err());
    }

    #[test]
    fn test_node_dir() {
        let cfg = config("3", "localhost:50051");
        assert_eq!(cfg.node_dir(), PathBuf::from("data/3"));
    }

    #[test]
    fn test_durations_roundtrip_through_json() {
        let cfg = config("1", "localhost:50051");
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["apply_timeout"], 1000);
        assert_eq!(json["raft"]["snapshot_interval"], 120);

        let back: NodeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.raft.heartbeat_timeout, Duration::from_millis(1000));
    }
}
