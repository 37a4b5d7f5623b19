//! jraft raft - consensus log implementations
//!
//! - `types`: Type definitions for OpenRaft integration
//! - `storage`: RocksDB-backed log storage
//! - `state_machine`: applies committed entries to the executor
//! - `network` / `rpc`: HTTP transport between nodes
//! - `log`: `ConsensusLog` over OpenRaft
//! - `memory`: in-process `ConsensusLog` for tests and development

pub mod log;
pub mod memory;
pub mod network;
pub mod rpc;
pub mod state_machine;
pub mod storage;
pub mod types;

pub use log::{openraft_config, RaftLog};
pub use memory::MemoryLog;
pub use network::{HttpNetwork, HttpNetworkFactory};
pub use rpc::raft_router;
pub use state_machine::{ExecutorStateMachine, SnapshotPayload, StoredSnapshot};
pub use storage::RocksLogStore;
pub use types::*;
