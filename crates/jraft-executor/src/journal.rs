//! In-memory executor that records every call

use crate::executor::Executor;
use jraft_core::{DataRequest, ExecutorError, ExecutorInfo};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Parameter stamped on every response with the call's journal position
pub const SEQUENCE_PARAM: &str = "sequence";

/// Executor that journals requests and echoes them back
///
/// Used for tests and local development. The journal is the executor's
/// entire state, so it round-trips through snapshots.
#[derive(Debug, Default)]
pub struct JournalExecutor {
    journal: RwLock<Vec<DataRequest>>,

    /// Endpoint -> rejection message
    failures: RwLock<HashMap<String, String>>,

    /// Reported by endpoint discovery
    endpoints: Vec<String>,
}

impl JournalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Reject every future call to `endpoint` with `message`
    pub async fn fail_endpoint(&self, endpoint: impl Into<String>, message: impl Into<String>) {
        self.failures
            .write()
            .await
            .insert(endpoint.into(), message.into());
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// All recorded calls, in the order they were handled
    pub async fn journal(&self) -> Vec<DataRequest> {
        self.journal.read().await.clone()
    }

    /// Request ids of all recorded calls
    pub async fn request_ids(&self) -> Vec<String> {
        self.journal
            .read()
            .await
            .iter()
            .map(|r| r.header.request_id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.journal.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.journal.read().await.is_empty()
    }
}

impl Executor for JournalExecutor {
    async fn call(&self, request: DataRequest) -> Result<DataRequest, ExecutorError> {
        if let Some(message) = self.failures.read().await.get(request.endpoint()) {
            return Err(ExecutorError::Rejected(message.clone()));
        }

        let mut journal = self.journal.write().await;
        journal.push(request.clone());
        let sequence = journal.len();

        Ok(request.with_parameter(SEQUENCE_PARAM, sequence.to_string()))
    }

    async fn endpoints(&self) -> Result<Vec<String>, ExecutorError> {
        Ok(self.endpoints.clone())
    }

    async fn info(&self) -> Result<ExecutorInfo, ExecutorError> {
        let entries = self.journal.read().await.len();
        Ok(ExecutorInfo {
            name: "journal".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            attributes: [("entries".to_string(), entries.to_string())].into(),
        })
    }

    async fn export_state(&self) -> Result<Option<Vec<u8>>, ExecutorError> {
        let journal = self.journal.read().await;
        serde_json::to_vec(&*journal)
            .map(Some)
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))
    }

    async fn import_state(&self, state: Vec<u8>) -> Result<(), ExecutorError> {
        let restored: Vec<DataRequest> = serde_json::from_slice(&state)
            .map_err(|e| ExecutorError::MalformedCommand(e.to_string()))?;
        tracing::info!(entries = restored.len(), "restored journal");
        *self.journal.write().await = restored;
        Ok(())
    }
}
