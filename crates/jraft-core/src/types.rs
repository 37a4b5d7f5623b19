//! Core types for jraft

use crate::error::{CommitStatus, ExecutorError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Routing header carried by every data request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Executor endpoint the request is addressed to
    pub endpoint: String,

    /// Caller-assigned request id
    pub request_id: String,

    /// Optional executor name, for deployments that host several executors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_executor: Option<String>,

    /// Free-form request parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// A single data request (or response, which has the same shape)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub header: RequestHeader,

    #[serde(default)]
    pub payload: Vec<u8>,
}

impl DataRequest {
    pub fn new(
        endpoint: impl Into<String>,
        request_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            header: RequestHeader {
                endpoint: endpoint.into(),
                request_id: request_id.into(),
                target_executor: None,
                parameters: BTreeMap::new(),
            },
            payload: payload.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.header.endpoint
    }

    pub fn request_id(&self) -> &str {
        &self.header.request_id
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.header.parameters.get(key).map(String::as_str)
    }
}

/// Result of applying one committed entry to the executor
///
/// `Empty` is produced for entries that carry no request (blank and
/// membership entries).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    Response(DataRequest),
    Error(ExecutorError),
    Empty,
}

impl ApplyResult {
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// Whether a member counts towards quorum
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suffrage {
    Voter,
    Nonvoter,
}

/// A member of the agreed cluster configuration
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: String,
    pub address: String,
    pub suffrage: Suffrage,
}

impl ClusterMember {
    pub fn voter(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Voter,
        }
    }

    pub fn nonvoter(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Nonvoter,
        }
    }

    pub fn is_voter(&self) -> bool {
        self.suffrage == Suffrage::Voter
    }
}

impl fmt::Display for ClusterMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Role of the local node, as observed from the consensus log
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
    ShuttingDown,
    Stopped,
}

impl NodeRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, Self::ShuttingDown | Self::Stopped)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Follower => "follower",
            Self::Candidate => "candidate",
            Self::Leader => "leader",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Current leader, for client redirection and health reporting
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub id: String,
    pub address: String,
    pub term: u64,
}

/// What an executor reports about itself
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Health of the node: serving iff a leader is known
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Serving,
    NotServing,
}

/// Error body returned by the HTTP surfaces
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retriable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_status: Option<CommitStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictBody>,
}

/// Member whose requested address clashes with the one on record
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConflictBody {
    pub id: String,
    pub existing: String,
    pub requested: String,
}
