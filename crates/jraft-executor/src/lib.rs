//! jraft executor - the replicated service and its state machine
//!
//! - `executor`: the `Executor` abstraction
//! - `http`: client for an executor reachable over HTTP
//! - `journal`: in-memory executor that records every call
//! - `fsm`: applies committed log entries to an executor

pub mod executor;
pub mod fsm;
pub mod http;
pub mod journal;

pub use executor::Executor;
pub use fsm::ExecutorFsm;
pub use http::HttpExecutor;
pub use journal::JournalExecutor;
