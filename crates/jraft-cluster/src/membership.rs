//! Cluster membership management

use jraft_core::{
    ClusterMember, ConsensusLog, HealthStatus, LeaderInfo, MembershipError, NodeRole,
};
use std::sync::Arc;
use std::time::Duration;

/// Membership operations for the local node
///
/// Every change goes through the consensus log as an agreed configuration
/// change; this type only validates and forwards.
pub struct MembershipManager<L> {
    log: Arc<L>,

    /// This node, as it registers itself on bootstrap
    local: ClusterMember,

    /// Upper bound on how long a configuration change may take
    timeout: Duration,
}

impl<L: ConsensusLog> MembershipManager<L> {
    pub fn new(log: Arc<L>, local: ClusterMember, timeout: Duration) -> Self {
        Self {
            log,
            local,
            timeout,
        }
    }

    pub fn local(&self) -> &ClusterMember {
        &self.local
    }

    /// One-time bootstrap with a single voter, this node unless given
    pub async fn bootstrap(&self, initial: Option<ClusterMember>) -> Result<(), MembershipError> {
        let member = initial.unwrap_or_else(|| self.local.clone());
        tracing::info!(%member, "bootstrapping cluster");
        self.log.bootstrap_cluster(vec![member]).await
    }

    /// Add a voter, or promote an existing nonvoter. Leader only.
    pub async fn add_voter(&self, id: &str, address: &str) -> Result<(), MembershipError> {
        tracing::info!(id, address, "adding voter");
        self.log.add_voter(id, address, self.timeout).await.map_err(|e| {
            tracing::warn!(id, address, error = %e, "failed to add voter");
            e
        })
    }

    /// Remove a voter or nonvoter. Leader only.
    pub async fn remove_server(&self, id: &str) -> Result<(), MembershipError> {
        tracing::info!(id, "removing server");
        self.log.remove_server(id, self.timeout).await
    }

    pub fn leader_info(&self) -> Option<LeaderInfo> {
        self.log.leader()
    }

    /// Serving iff a leader is known
    pub fn health(&self) -> HealthStatus {
        if self.log.state().is_running() && self.log.leader().is_some() {
            HealthStatus::Serving
        } else {
            HealthStatus::NotServing
        }
    }

    pub fn configuration(&self) -> Vec<ClusterMember> {
        self.log.configuration()
    }

    pub fn role(&self) -> NodeRole {
        self.log.state()
    }

    /// Whether the local node is part of the given configuration
    pub fn is_member(&self, configuration: &[ClusterMember]) -> bool {
        configuration.iter().any(|m| m.id == self.local.id)
    }
}
