//! Executor state machine
//!
//! Committed log entries are decoded back into data requests and handed to
//! the executor, one at a time and in commit order. Reads bypass the log and
//! go straight to the executor.

use crate::executor::Executor;
use jraft_core::{decode_command, ApplyResult, DataRequest, ExecutorError, ExecutorInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Applies committed entries to an executor
pub struct ExecutorFsm<E> {
    executor: Arc<E>,

    /// Number of entries handed to `apply`
    applied: AtomicU64,

    /// Present in exclusive mode: apply holds it for writing, read for reading
    gate: Option<RwLock<()>>,
}

impl<E: Executor> ExecutorFsm<E> {
    /// State machine whose reads may overlap with apply
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            applied: AtomicU64::new(0),
            gate: None,
        }
    }

    /// State machine whose reads wait for any in-flight apply
    pub fn exclusive(executor: Arc<E>) -> Self {
        Self {
            gate: Some(RwLock::new(())),
            ..Self::new(executor)
        }
    }

    pub fn with_exclusive_reads(executor: Arc<E>, exclusive: bool) -> Self {
        if exclusive {
            Self::exclusive(executor)
        } else {
            Self::new(executor)
        }
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub fn is_exclusive(&self) -> bool {
        self.gate.is_some()
    }

    /// Apply one committed entry
    ///
    /// Never fails: an undecodable entry or an executor failure becomes the
    /// entry's result, which every replica computes the same way.
    pub async fn apply(&self, entry: &[u8]) -> ApplyResult {
        let _guard = match &self.gate {
            Some(gate) => Some(gate.write().await),
            None => None,
        };
        self.applied.fetch_add(1, Ordering::SeqCst);

        let request = match decode_command(entry) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, len = entry.len(), "undecodable log entry");
                return ApplyResult::Error(ExecutorError::MalformedCommand(e.to_string()));
            }
        };

        tracing::debug!(
            endpoint = %request.header.endpoint,
            request_id = %request.header.request_id,
            "applying request"
        );

        match self.executor.call(request).await {
            Ok(response) => ApplyResult::Response(response),
            Err(e) => {
                tracing::debug!(error = %e, "executor failed to apply request");
                ApplyResult::Error(e)
            }
        }
    }

    /// Serve a read-only request against the local executor
    pub async fn read(&self, request: DataRequest) -> Result<DataRequest, ExecutorError> {
        let _guard = match &self.gate {
            Some(gate) => Some(gate.read().await),
            None => None,
        };
        self.executor.call(request).await
    }

    /// Endpoints served by the local executor
    pub async fn endpoints(&self) -> Result<Vec<String>, ExecutorError> {
        self.executor.endpoints().await
    }

    /// Descriptive details of the local executor
    pub async fn info(&self) -> Result<ExecutorInfo, ExecutorError> {
        self.executor.info().await
    }

    /// Executor state to embed in a log snapshot
    pub async fn snapshot(&self) -> Result<Option<Vec<u8>>, ExecutorError> {
        self.executor.export_state().await
    }

    /// Restore executor state from a log snapshot
    pub async fn restore(&self, state: Vec<u8>) -> Result<(), ExecutorError> {
        let _guard = match &self.gate {
            Some(gate) => Some(gate.write().await),
            None => None,
        };
        self.executor.import_state(state).await
    }

    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalExecutor;
    use jraft_core::encode_command;
    use std::time::Duration;

    fn entry(endpoint: &str, id: &str) -> Vec<u8> {
        encode_command(&DataRequest::new(endpoint, id, Vec::new())).unwrap()
    }

    #[tokio::test]
    async fn test_apply_forwards_to_executor() {
        let fsm = ExecutorFsm::new(Arc::new(JournalExecutor::new()));

        let result = fsm.apply(&entry("upsert", "r-1")).await;
        match result {
            ApplyResult::Response(resp) => assert_eq!(resp.request_id(), "r-1"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fsm.applied_count(), 1);
        assert_eq!(fsm.executor().request_ids().await, vec!["r-1"]);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_a_result() {
        let fsm = ExecutorFsm::new(Arc::new(JournalExecutor::new()));

        let result = fsm.apply(b"\x00\x01 not json").await;
        assert!(matches!(
            result,
            ApplyResult::Error(ExecutorError::MalformedCommand(_))
        ));
        assert_eq!(fsm.applied_count(), 1);
        assert!(fsm.executor().is_empty().await);
    }

    #[tokio::test]
    async fn test_executor_error_is_a_result() {
        let executor = Arc::new(JournalExecutor::new());
        executor.fail_endpoint("upsert", "duplicate key").await;
        let fsm = ExecutorFsm::new(executor);

        let result = fsm.apply(&entry("upsert", "r-1")).await;
        assert_eq!(
            result,
            ApplyResult::Error(ExecutorError::Rejected("duplicate key".into()))
        );
    }

    #[tokio::test]
    async fn test_read_does_not_count_as_apply() {
        let fsm = ExecutorFsm::new(Arc::new(JournalExecutor::new()));

        let resp = fsm
            .read(DataRequest::new("search", "q-1", Vec::new()))
            .await
            .unwrap();
        assert_eq!(resp.request_id(), "q-1");
        assert_eq!(fsm.applied_count(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_read_waits_for_apply() {
        let fsm = Arc::new(ExecutorFsm::exclusive(Arc::new(JournalExecutor::new())));
        assert!(fsm.is_exclusive());

        let gate = fsm.gate.as_ref().unwrap().write().await;
        let reader = {
            let fsm = fsm.clone();
            tokio::spawn(async move { fsm.read(DataRequest::new("search", "q", Vec::new())).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        drop(gate);
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let fsm = ExecutorFsm::new(Arc::new(JournalExecutor::new()));
        fsm.apply(&entry("upsert", "a")).await;
        fsm.apply(&entry("upsert", "b")).await;

        let state = fsm.snapshot().await.unwrap().unwrap();
        let restored = ExecutorFsm::new(Arc::new(JournalExecutor::new()));
        restored.restore(state).await.unwrap();

        assert_eq!(restored.executor().request_ids().await, vec!["a", "b"]);
    }
}
