//! Type definitions for OpenRaft integration

use jraft_core::{ApplyResult, MembershipError};
use openraft::BasicNode;
use serde::{Deserialize, Serialize};

/// Node id type used by OpenRaft
pub type NodeId = u64;

/// A log entry's application payload: the canonical bytes of one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCommand(pub Vec<u8>);

openraft::declare_raft_types!(
    /// OpenRaft type configuration for jraft
    pub TypeConfig:
        D = LogCommand,
        R = ApplyResult,
);

pub type ExecutorRaft = openraft::Raft<TypeConfig>;
pub type RaftEntry = openraft::Entry<TypeConfig>;
pub type RaftLogId = openraft::LogId<NodeId>;
pub type RaftVote = openraft::Vote<NodeId>;
pub type RaftStoredMembership = openraft::StoredMembership<NodeId, BasicNode>;
pub type RaftSnapshotMeta = openraft::SnapshotMeta<NodeId, BasicNode>;
pub type RaftSnapshot = openraft::storage::Snapshot<TypeConfig>;
pub type RaftStorageError = openraft::StorageError<NodeId>;
pub type RaftMetrics = openraft::RaftMetrics<NodeId, BasicNode>;

/// Parse a cluster member id into an OpenRaft node id
pub fn parse_node_id(id: &str) -> Result<NodeId, MembershipError> {
    id.parse()
        .map_err(|_| MembershipError::InvalidMember(format!("node id {:?} is not a u64", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_id() {
        assert_eq!(parse_node_id("42").unwrap(), 42);
        assert!(matches!(
            parse_node_id("node-a"),
            Err(MembershipError::InvalidMember(_))
        ));
        assert!(parse_node_id("").is_err());
    }
}
