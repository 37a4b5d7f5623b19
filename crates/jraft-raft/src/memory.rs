//! In-process consensus log
//!
//! A single ordered log shared by a set of replica state machines living in
//! the same process. Every command is appended and applied to every replica
//! while the log lock is held, so all replicas see exactly the commit order.
//! Used by tests and for single-process development.

use jraft_core::{
    plan_add_voter, ApplyResult, ClusterMember, ConsensusLog, LeaderInfo, LogError,
    MembershipError, NodeRole, VoterChange,
};
use jraft_executor::{Executor, ExecutorFsm};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Role and leader as seen by the local node
#[derive(Debug)]
struct Leadership {
    role: NodeRole,
    leader: Option<LeaderInfo>,
}

pub struct MemoryLog<E> {
    id: String,
    address: String,

    entries: Mutex<Vec<Vec<u8>>>,

    /// The local replica comes first
    replicas: Vec<Arc<ExecutorFsm<E>>>,

    members: RwLock<Vec<ClusterMember>>,
    leadership: RwLock<Leadership>,
    term: AtomicU64,
    commits: AtomicU64,

    stalled: AtomicBool,
    fail_shutdown: AtomicBool,
}

impl<E: Executor> MemoryLog<E> {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        local: Arc<ExecutorFsm<E>>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            entries: Mutex::new(Vec::new()),
            replicas: vec![local],
            members: RwLock::new(Vec::new()),
            leadership: RwLock::new(Leadership {
                role: NodeRole::Follower,
                leader: None,
            }),
            term: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
        }
    }

    /// Add a follower replica that receives every committed entry
    pub fn with_replica(mut self, replica: Arc<ExecutorFsm<E>>) -> Self {
        self.replicas.push(replica);
        self
    }

    pub fn local(&self) -> &Arc<ExecutorFsm<E>> {
        &self.replicas[0]
    }

    /// Committed commands, in commit order
    pub async fn entries(&self) -> Vec<Vec<u8>> {
        self.entries.lock().await.clone()
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make applies hang until their timeout, as if commit never completed
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make `shutdown` report a failure
    pub fn set_fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    /// Lose leadership, optionally to a known leader
    pub fn demote_to_follower(&self, leader: Option<LeaderInfo>) {
        let mut leadership = write(&self.leadership);
        leadership.role = NodeRole::Follower;
        leadership.leader = leader;
    }

    fn check_leader(&self) -> Result<(), LogError> {
        let leadership = read(&self.leadership);
        match leadership.role {
            NodeRole::Leader => Ok(()),
            NodeRole::ShuttingDown | NodeRole::Stopped => Err(LogError::ShuttingDown),
            NodeRole::Follower | NodeRole::Candidate => Err(LogError::NotLeader {
                leader: leadership.leader.as_ref().map(|l| l.address.clone()),
            }),
        }
    }

    fn set_role(&self, role: NodeRole) {
        write(&self.leadership).role = role;
    }
}

// Poisoning only follows a panic elsewhere, which already failed the test
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl<E: Executor> ConsensusLog for MemoryLog<E> {
    async fn apply(&self, command: Vec<u8>, timeout: Duration) -> Result<ApplyResult, LogError> {
        self.check_leader()?;

        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(LogError::Timeout(timeout));
        }

        let mut entries = self.entries.lock().await;
        // Leadership may have changed while waiting for the log
        self.check_leader()?;
        entries.push(command);
        let index = entries.len();
        let command = &entries[index - 1];

        let mut results = Vec::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            results.push(replica.apply(command).await);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(index, replicas = self.replicas.len(), "command committed");

        Ok(results.swap_remove(0))
    }

    async fn bootstrap_cluster(&self, members: Vec<ClusterMember>) -> Result<(), MembershipError> {
        if members.is_empty() || members.iter().any(|m| !m.is_voter()) {
            return Err(MembershipError::InvalidMember(
                "initial configuration needs at least one member, all voters".into(),
            ));
        }

        let entries = self.entries.lock().await;
        let mut current = write(&self.members);
        if !current.is_empty() || !entries.is_empty() {
            return Err(MembershipError::AlreadyBootstrapped);
        }

        let leader = members
            .iter()
            .find(|m| m.id == self.id)
            .map(|m| m.address.clone());
        *current = members;
        drop(current);

        if let Some(address) = leader {
            let term = self.term.fetch_add(1, Ordering::SeqCst) + 1;
            let mut leadership = write(&self.leadership);
            leadership.role = NodeRole::Leader;
            leadership.leader = Some(LeaderInfo {
                id: self.id.clone(),
                address,
                term,
            });
        }

        tracing::info!(id = %self.id, "cluster bootstrapped");
        Ok(())
    }

    async fn add_voter(
        &self,
        id: &str,
        address: &str,
        _timeout: Duration,
    ) -> Result<(), MembershipError> {
        self.check_leader()?;

        let mut members = write(&self.members);
        match plan_add_voter(&members, id, address)? {
            VoterChange::Unchanged => {}
            VoterChange::Promote => {
                for member in members.iter_mut().filter(|m| m.id == id) {
                    *member = ClusterMember::voter(id, address);
                }
            }
            VoterChange::Add => members.push(ClusterMember::voter(id, address)),
        }
        Ok(())
    }

    async fn remove_server(&self, id: &str, _timeout: Duration) -> Result<(), MembershipError> {
        self.check_leader()?;

        let mut members = write(&self.members);
        let before = members.len();
        members.retain(|m| m.id != id);
        if members.len() == before {
            return Err(MembershipError::UnknownMember(id.to_string()));
        }
        drop(members);

        if id == self.id {
            self.demote_to_follower(None);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), LogError> {
        self.set_role(NodeRole::ShuttingDown);
        // Wait for any apply in progress
        let _entries = self.entries.lock().await;
        write(&self.leadership).leader = None;
        self.set_role(NodeRole::Stopped);

        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(LogError::Internal("log failed to shut down".into()));
        }
        Ok(())
    }

    fn state(&self) -> NodeRole {
        read(&self.leadership).role
    }

    fn leader(&self) -> Option<LeaderInfo> {
        read(&self.leadership).leader.clone()
    }

    fn configuration(&self) -> Vec<ClusterMember> {
        read(&self.members).clone()
    }
}
