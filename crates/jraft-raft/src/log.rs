//! `ConsensusLog` backed by OpenRaft

use crate::network::HttpNetworkFactory;
use crate::state_machine::ExecutorStateMachine;
use crate::storage::RocksLogStore;
use crate::types::{parse_node_id, ExecutorRaft, LogCommand, NodeId, RaftMetrics};
use jraft_core::{
    plan_add_voter, ApplyResult, ClusterMember, ConsensusLog, LeaderInfo, LogError,
    MembershipError, NodeRole, RaftConfig, StartupError, VoterChange,
};
use jraft_executor::Executor;
use openraft::error::{ClientWriteError, Fatal, InitializeError, RaftError};
use openraft::{BasicNode, ChangeMembers, Raft, ServerState, SnapshotPolicy};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Translate node settings into an OpenRaft config
///
/// The heartbeat timeout is the follower's patience, so the leader beats at
/// half of it. Commit and lease timeouts have no OpenRaft counterpart.
pub fn openraft_config(config: &RaftConfig) -> Result<openraft::Config, StartupError> {
    let heartbeat = config.heartbeat_timeout.as_millis() as u64;
    let election = config.election_timeout.as_millis() as u64;

    let raft_config = openraft::Config {
        cluster_name: "jraft".to_string(),
        heartbeat_interval: (heartbeat / 2).max(1),
        election_timeout_min: election,
        election_timeout_max: election * 2,
        max_payload_entries: config.max_append_entries,
        max_in_snapshot_log_to_keep: config.trailing_logs,
        snapshot_policy: SnapshotPolicy::LogsSinceLast(config.snapshot_threshold),
        ..Default::default()
    };

    raft_config
        .validate()
        .map_err(|e| StartupError::Config(e.to_string()))
}

/// The production consensus log
pub struct RaftLog {
    node_id: NodeId,
    raft: Arc<ExecutorRaft>,
    shutting_down: AtomicBool,
    stopped: AtomicBool,
}

impl RaftLog {
    /// Start the Raft instance over the given store and state machine
    pub async fn start<E: Executor>(
        node_id: NodeId,
        config: &RaftConfig,
        store: RocksLogStore,
        state_machine: Arc<ExecutorStateMachine<E>>,
    ) -> Result<Self, StartupError> {
        let raft_config = Arc::new(openraft_config(config)?);

        let raft = Raft::new(
            node_id,
            raft_config,
            HttpNetworkFactory::new(),
            store,
            state_machine,
        )
        .await
        .map_err(|e| StartupError::Consensus(e.to_string()))?;

        tracing::info!(node_id, "raft started");

        Ok(Self {
            node_id,
            raft: Arc::new(raft),
            shutting_down: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn raft(&self) -> &Arc<ExecutorRaft> {
        &self.raft
    }

    pub fn metrics(&self) -> RaftMetrics {
        self.raft.metrics().borrow().clone()
    }

    /// Ask for a snapshot every `every`, on top of the log-size policy
    pub fn spawn_snapshot_ticker(&self, every: Duration) -> JoinHandle<()> {
        let raft = self.raft.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = raft.trigger().snapshot().await {
                    tracing::debug!(error = %e, "snapshot ticker stopped");
                    break;
                }
            }
        })
    }

    fn address_of(metrics: &RaftMetrics, node_id: NodeId) -> Option<String> {
        metrics
            .membership_config
            .membership()
            .nodes()
            .find(|(id, _)| **id == node_id)
            .map(|(_, node)| node.addr.clone())
    }

    /// Fail with `NotLeader` unless this node currently leads
    fn ensure_leader(&self) -> Result<(), LogError> {
        let metrics = self.metrics();
        match metrics.current_leader {
            Some(leader) if leader == self.node_id => Ok(()),
            Some(leader) => Err(LogError::NotLeader {
                leader: Self::address_of(&metrics, leader),
            }),
            None => Err(LogError::NotLeader { leader: None }),
        }
    }

    fn ensure_running(&self) -> Result<(), LogError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            Err(LogError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Run a membership write with an upper bound on the wait
    async fn change<F, T>(&self, timeout: Duration, write: F) -> Result<T, LogError>
    where
        F: Future<Output = Result<T, RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>>>,
    {
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.map_err(write_error),
            Err(_) => Err(LogError::Timeout(timeout)),
        }
    }
}

fn fatal_error(e: Fatal<NodeId>) -> LogError {
    match e {
        Fatal::Stopped => LogError::Stopped,
        other => LogError::Internal(other.to_string()),
    }
}

fn write_error(e: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>) -> LogError {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => LogError::NotLeader {
            leader: forward.leader_node.map(|node| node.addr),
        },
        RaftError::APIError(other) => LogError::Internal(other.to_string()),
        RaftError::Fatal(fatal) => fatal_error(fatal),
    }
}

fn role_of(state: ServerState) -> NodeRole {
    match state {
        ServerState::Leader => NodeRole::Leader,
        ServerState::Candidate => NodeRole::Candidate,
        ServerState::Follower | ServerState::Learner => NodeRole::Follower,
        ServerState::Shutdown => NodeRole::Stopped,
    }
}

impl ConsensusLog for RaftLog {
    async fn apply(&self, command: Vec<u8>, timeout: Duration) -> Result<ApplyResult, LogError> {
        self.ensure_running()?;

        match tokio::time::timeout(timeout, self.raft.client_write(LogCommand(command))).await {
            Ok(Ok(response)) => {
                tracing::debug!(log_id = %response.log_id, "command committed");
                Ok(response.data)
            }
            Ok(Err(e)) => Err(write_error(e)),
            Err(_) => Err(LogError::Timeout(timeout)),
        }
    }

    async fn bootstrap_cluster(&self, members: Vec<ClusterMember>) -> Result<(), MembershipError> {
        if members.is_empty() {
            return Err(MembershipError::InvalidMember(
                "initial configuration is empty".into(),
            ));
        }

        let mut nodes = BTreeMap::new();
        for member in &members {
            if !member.is_voter() {
                return Err(MembershipError::InvalidMember(format!(
                    "{} cannot bootstrap a cluster as a nonvoter",
                    member
                )));
            }
            nodes.insert(parse_node_id(&member.id)?, BasicNode::new(&member.address));
        }

        self.raft.initialize(nodes).await.map_err(|e| match e {
            RaftError::APIError(InitializeError::NotAllowed(_)) => {
                MembershipError::AlreadyBootstrapped
            }
            RaftError::APIError(other) => MembershipError::InvalidMember(other.to_string()),
            RaftError::Fatal(fatal) => MembershipError::Log(fatal_error(fatal)),
        })?;

        tracing::info!(members = members.len(), "cluster bootstrapped");
        Ok(())
    }

    async fn add_voter(
        &self,
        id: &str,
        address: &str,
        timeout: Duration,
    ) -> Result<(), MembershipError> {
        let node_id = parse_node_id(id)?;
        self.ensure_running()?;
        self.ensure_leader()?;

        match plan_add_voter(&self.configuration(), id, address)? {
            VoterChange::Unchanged => {
                tracing::debug!(id, address, "voter already present");
                return Ok(());
            }
            VoterChange::Promote => {}
            VoterChange::Add => {
                self.change(
                    timeout,
                    self.raft.add_learner(node_id, BasicNode::new(address), true),
                )
                .await?;
            }
        }

        self.change(
            timeout,
            self.raft.change_membership(
                ChangeMembers::AddVoterIds(BTreeSet::from([node_id])),
                false,
            ),
        )
        .await?;

        tracing::info!(id, address, "added voter");
        Ok(())
    }

    async fn remove_server(&self, id: &str, timeout: Duration) -> Result<(), MembershipError> {
        let node_id = parse_node_id(id)?;
        self.ensure_running()?;
        self.ensure_leader()?;

        let member = self
            .configuration()
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| MembershipError::UnknownMember(id.to_string()))?;

        let ids = BTreeSet::from([node_id]);
        let change = if member.is_voter() {
            ChangeMembers::RemoveVoters(ids)
        } else {
            ChangeMembers::RemoveNodes(ids)
        };
        self.change(timeout, self.raft.change_membership(change, false))
            .await?;

        tracing::info!(%member, "removed server");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), LogError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self
            .raft
            .shutdown()
            .await
            .map_err(|e| LogError::Internal(e.to_string()));
        self.stopped.store(true, Ordering::SeqCst);

        tracing::info!(node_id = self.node_id, ok = result.is_ok(), "raft stopped");
        result
    }

    fn state(&self) -> NodeRole {
        if self.stopped.load(Ordering::SeqCst) {
            NodeRole::Stopped
        } else if self.shutting_down.load(Ordering::SeqCst) {
            NodeRole::ShuttingDown
        } else {
            role_of(self.raft.metrics().borrow().state)
        }
    }

    fn leader(&self) -> Option<LeaderInfo> {
        let metrics = self.metrics();
        let leader = metrics.current_leader?;
        Some(LeaderInfo {
            id: leader.to_string(),
            address: Self::address_of(&metrics, leader).unwrap_or_default(),
            term: metrics.current_term,
        })
    }

    fn configuration(&self) -> Vec<ClusterMember> {
        let metrics = self.metrics();
        let membership = metrics.membership_config.membership();
        let voters: BTreeSet<NodeId> = membership.voter_ids().collect();

        membership
            .nodes()
            .map(|(id, node)| {
                if voters.contains(id) {
                    ClusterMember::voter(id.to_string(), node.addr.clone())
                } else {
                    ClusterMember::nonvoter(id.to_string(), node.addr.clone())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jraft_core::CommitStatus;

    #[test]
    fn test_openraft_config_mapping() {
        let config = RaftConfig {
            heartbeat_timeout: Duration::from_millis(200),
            election_timeout: Duration::from_millis(300),
            max_append_entries: 32,
            trailing_logs: 100,
            snapshot_threshold: 500,
            ..Default::default()
        };

        let raft_config = openraft_config(&config).unwrap();
        assert_eq!(raft_config.heartbeat_interval, 100);
        assert_eq!(raft_config.election_timeout_min, 300);
        assert_eq!(raft_config.election_timeout_max, 600);
        assert_eq!(raft_config.max_payload_entries, 32);
        assert_eq!(raft_config.max_in_snapshot_log_to_keep, 100);
        assert!(matches!(
            raft_config.snapshot_policy,
            SnapshotPolicy::LogsSinceLast(500)
        ));
    }

    #[test]
    fn test_openraft_config_rejects_slow_heartbeat() {
        let config = RaftConfig {
            heartbeat_timeout: Duration::from_millis(5000),
            election_timeout: Duration::from_millis(1000),
            ..Default::default()
        };
        assert!(matches!(
            openraft_config(&config),
            Err(StartupError::Config(_))
        ));
    }

    #[test]
    fn test_stopped_mid_write_has_unknown_outcome() {
        let err = write_error(RaftError::Fatal(Fatal::Stopped));
        assert_eq!(err, LogError::Stopped);
        assert_eq!(err.commit_status(), CommitStatus::Unknown);

        let err = write_error(RaftError::Fatal(Fatal::Panicked));
        assert!(matches!(err, LogError::Internal(_)));
        assert_eq!(err.commit_status(), CommitStatus::Unknown);
    }

    #[test]
    fn test_role_mapping() {
        assert_eq!(role_of(ServerState::Learner), NodeRole::Follower);
        assert_eq!(role_of(ServerState::Shutdown), NodeRole::Stopped);
        assert_eq!(role_of(ServerState::Leader), NodeRole::Leader);
    }
}
