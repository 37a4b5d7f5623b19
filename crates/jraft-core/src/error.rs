//! Error types for jraft

use crate::types::ConflictBody;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// What the caller can assume about a failed write
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    /// The command never reached the log
    NotApplied,
    /// The command may or may not have been committed
    Unknown,
    /// The command was committed and applied
    Applied,
}

/// Failure reported by the executor itself
///
/// Returned inside a committed apply result, so it is the operation's own
/// outcome and is identical on every replica that applied the entry.
#[derive(Error, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExecutorError {
    #[error("executor rejected request: {0}")]
    Rejected(String),

    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Failure reported by the consensus log
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum LogError {
    #[error("not leader, current leader is {leader:?}")]
    NotLeader { leader: Option<String> },

    #[error("apply timed out after {0:?}")]
    Timeout(Duration),

    #[error("consensus log is shutting down")]
    ShuttingDown,

    /// The log stopped while the command was in flight
    #[error("consensus log stopped before the command finished")]
    Stopped,

    #[error("consensus log error: {0}")]
    Internal(String),
}

impl LogError {
    pub fn commit_status(&self) -> CommitStatus {
        match self {
            Self::NotLeader { .. } | Self::ShuttingDown => CommitStatus::NotApplied,
            Self::Timeout(_) | Self::Stopped | Self::Internal(_) => CommitStatus::Unknown,
        }
    }

    pub fn leader(&self) -> Option<&str> {
        match self {
            Self::NotLeader { leader } => leader.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_leader(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }

    /// Stable error code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLeader { .. } => "NOT_LEADER",
            Self::Timeout(_) => "TIMEOUT",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Stopped => "STOPPED",
            Self::Internal(_) => "LOG_ERROR",
        }
    }
}

/// Failure of a data request, as seen by the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("failed to serialize request: {0}")]
    Serialization(String),

    #[error("node is not accepting requests")]
    NotAccepting,

    /// The log failed; resubmit, ideally against the current leader
    #[error("retriable: {0}")]
    Retriable(#[source] LogError),

    #[error("executor failed to apply request: {0}")]
    Executor(#[source] ExecutorError),

    #[error("executor failed to serve read: {0}")]
    Read(#[source] ExecutorError),

    #[error("unexpected apply result: {0}")]
    UnexpectedResult(String),
}

impl DispatchError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_) | Self::NotAccepting)
    }

    pub fn commit_status(&self) -> CommitStatus {
        match self {
            Self::Serialization(_) | Self::NotAccepting | Self::Read(_) => CommitStatus::NotApplied,
            Self::Retriable(e) => e.commit_status(),
            Self::Executor(_) | Self::UnexpectedResult(_) => CommitStatus::Applied,
        }
    }

    pub fn leader(&self) -> Option<&str> {
        match self {
            Self::Retriable(e) => e.leader(),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "SERIALIZATION",
            Self::NotAccepting => "NOT_ACCEPTING",
            Self::Retriable(e) => e.code(),
            Self::Executor(_) | Self::Read(_) => "EXECUTOR",
            Self::UnexpectedResult(_) => "UNEXPECTED_RESULT",
        }
    }
}

/// Failure of a cluster membership operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("cluster is already bootstrapped")]
    AlreadyBootstrapped,

    #[error("invalid member: {0}")]
    InvalidMember(String),

    #[error("unknown member: {0}")]
    UnknownMember(String),

    #[error("member {id} already registered at {existing}, refusing {requested}")]
    AddressConflict {
        id: String,
        existing: String,
        requested: String,
    },

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("admin transport error: {0}")]
    Transport(String),
}

impl MembershipError {
    pub fn is_not_leader(&self) -> bool {
        matches!(self, Self::Log(e) if e.is_not_leader())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyBootstrapped => "ALREADY_BOOTSTRAPPED",
            Self::InvalidMember(_) => "INVALID_MEMBER",
            Self::UnknownMember(_) => "UNKNOWN_MEMBER",
            Self::AddressConflict { .. } => "ADDRESS_CONFLICT",
            Self::Log(e) => e.code(),
            Self::Transport(_) => "TRANSPORT",
        }
    }

    pub fn leader(&self) -> Option<&str> {
        match self {
            Self::Log(e) => e.leader(),
            _ => None,
        }
    }

    pub fn conflict(&self) -> Option<ConflictBody> {
        match self {
            Self::AddressConflict {
                id,
                existing,
                requested,
            } => Some(ConflictBody {
                id: id.clone(),
                existing: existing.clone(),
                requested: requested.clone(),
            }),
            _ => None,
        }
    }
}

/// Fatal error while starting a node
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open storage: {0}")]
    Storage(String),

    #[error("failed to start consensus log: {0}")]
    Consensus(String),

    #[error("failed to bootstrap cluster: {0}")]
    Bootstrap(#[source] MembershipError),

    #[error("failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Fatal error while shutting a node down
///
/// Local state cannot be trusted after one of these, so the process is
/// expected to exit.
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("transport failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("consensus log shutdown failed: {0}")]
    Consensus(#[source] LogError),

    #[error("node task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let not_leader = DispatchError::Retriable(LogError::NotLeader {
            leader: Some("10.0.0.2:50051".into()),
        });
        assert!(not_leader.is_retriable());
        assert_eq!(not_leader.commit_status(), CommitStatus::NotApplied);
        assert_eq!(not_leader.leader(), Some("10.0.0.2:50051"));

        let timeout = DispatchError::Retriable(LogError::Timeout(Duration::from_secs(1)));
        assert!(timeout.is_retriable());
        assert_eq!(timeout.commit_status(), CommitStatus::Unknown);

        let executor = DispatchError::Executor(ExecutorError::Rejected("bad doc".into()));
        assert!(!executor.is_retriable());
        assert_eq!(executor.commit_status(), CommitStatus::Applied);

        let stopped = DispatchError::Retriable(LogError::Stopped);
        assert!(stopped.is_retriable());
        assert_eq!(stopped.commit_status(), CommitStatus::Unknown);

        let rejected = DispatchError::Retriable(LogError::ShuttingDown);
        assert_eq!(rejected.commit_status(), CommitStatus::NotApplied);

        let serialization = DispatchError::Serialization("boom".into());
        assert!(!serialization.is_retriable());
        assert_eq!(serialization.commit_status(), CommitStatus::NotApplied);
    }

    #[test]
    fn test_membership_not_leader() {
        let err = MembershipError::from(LogError::NotLeader { leader: None });
        assert!(err.is_not_leader());
        assert_eq!(err.code(), "NOT_LEADER");
        assert!(!MembershipError::AlreadyBootstrapped.is_not_leader());
        assert_eq!(MembershipError::AlreadyBootstrapped.code(), "ALREADY_BOOTSTRAPPED");
    }
}
