//! The consensus log as seen by the rest of the node
//!
//! Leader election, log persistence and snapshotting live behind this trait.
//! The dispatcher and the membership manager only ever talk to it, which keeps
//! them testable against an in-process log.

use crate::error::{LogError, MembershipError};
use crate::types::{ApplyResult, ClusterMember, LeaderInfo, NodeRole};
use std::future::Future;
use std::time::Duration;

/// Replicated, totally ordered command log
pub trait ConsensusLog: Send + Sync + 'static {
    /// Submit a command and wait until it is committed and applied locally.
    ///
    /// On success the result is whatever the state machine produced for the
    /// entry. A timeout only ends the wait; the command may still commit.
    fn apply(
        &self,
        command: Vec<u8>,
        timeout: Duration,
    ) -> impl Future<Output = Result<ApplyResult, LogError>> + Send;

    /// Write the initial configuration. Fails if one already exists.
    fn bootstrap_cluster(
        &self,
        members: Vec<ClusterMember>,
    ) -> impl Future<Output = Result<(), MembershipError>> + Send;

    /// Add (or promote) a voting member. Only the leader accepts this.
    fn add_voter(
        &self,
        id: &str,
        address: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), MembershipError>> + Send;

    /// Remove a voting or non-voting member. Only the leader accepts this.
    fn remove_server(
        &self,
        id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), MembershipError>> + Send;

    /// Stop the log. Nothing is submitted after this starts.
    fn shutdown(&self) -> impl Future<Output = Result<(), LogError>> + Send;

    fn state(&self) -> NodeRole;

    fn leader(&self) -> Option<LeaderInfo>;

    /// Members of the latest known configuration
    fn configuration(&self) -> Vec<ClusterMember>;
}
