//! Data request dispatcher

use crate::classifier::{Classifier, Route};
use jraft_core::{
    encode_command, ApplyResult, ConsensusLog, DataRequest, DispatchError, ExecutorInfo,
};
use jraft_executor::{Executor, ExecutorFsm};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Entry point for every data request
///
/// Writes are submitted to the consensus log exactly once and answered with
/// whatever the state machine produced for the committed entry. Reads go to
/// the local replica and never touch the log. There is no automatic retry.
pub struct Dispatcher<L, E> {
    log: Arc<L>,
    fsm: Arc<ExecutorFsm<E>>,
    classifier: Arc<dyn Classifier>,
    apply_timeout: Duration,
    accepting: AtomicBool,
}

impl<L: ConsensusLog, E: Executor> Dispatcher<L, E> {
    pub fn new(log: Arc<L>, fsm: Arc<ExecutorFsm<E>>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            log,
            fsm,
            classifier,
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    pub fn apply_timeout(&self) -> Duration {
        self.apply_timeout
    }

    pub fn route(&self, request: &DataRequest) -> Route {
        self.classifier.route(request.endpoint())
    }

    /// Stop accepting new requests. In-flight requests finish normally.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("dispatcher closed");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Serve one data request
    pub async fn handle(&self, request: DataRequest) -> Result<DataRequest, DispatchError> {
        self.ensure_accepting()?;

        match self.route(&request) {
            Route::Write => self.write(request).await,
            Route::Read => self.read(request).await,
        }
    }

    /// Endpoints of the local executor; never touches the log
    pub async fn endpoints(&self) -> Result<Vec<String>, DispatchError> {
        self.ensure_accepting()?;
        self.fsm.endpoints().await.map_err(DispatchError::Read)
    }

    /// Details of the local executor; never touches the log
    pub async fn info(&self) -> Result<ExecutorInfo, DispatchError> {
        self.ensure_accepting()?;
        self.fsm.info().await.map_err(DispatchError::Read)
    }

    fn ensure_accepting(&self) -> Result<(), DispatchError> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(DispatchError::NotAccepting)
        }
    }

    async fn write(&self, request: DataRequest) -> Result<DataRequest, DispatchError> {
        let command =
            encode_command(&request).map_err(|e| DispatchError::Serialization(e.to_string()))?;

        let result = self
            .log
            .apply(command, self.apply_timeout)
            .await
            .map_err(|e| {
                tracing::warn!(
                    endpoint = request.endpoint(),
                    request_id = request.request_id(),
                    error = %e,
                    "write not committed"
                );
                DispatchError::Retriable(e)
            })?;

        match result {
            ApplyResult::Response(response) => Ok(response),
            ApplyResult::Error(e) => {
                tracing::debug!(
                    endpoint = request.endpoint(),
                    request_id = request.request_id(),
                    error = %e,
                    "executor failed committed write"
                );
                Err(DispatchError::Executor(e))
            }
            ApplyResult::Empty => Err(DispatchError::UnexpectedResult(format!(
                "no response for committed write {}",
                request.request_id()
            ))),
        }
    }

    async fn read(&self, request: DataRequest) -> Result<DataRequest, DispatchError> {
        self.fsm.read(request).await.map_err(DispatchError::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::WriteEndpoints;
    use jraft_core::{
        ClusterMember, CommitStatus, ExecutorError, LeaderInfo, LogError, MembershipError,
        NodeRole,
    };
    use jraft_executor::JournalExecutor;
    use jraft_raft::MemoryLog;

    const ADDR: &str = "127.0.0.1:50051";

    type TestDispatcher = Dispatcher<MemoryLog<JournalExecutor>, JournalExecutor>;

    async fn setup() -> (Arc<MemoryLog<JournalExecutor>>, TestDispatcher) {
        let fsm = Arc::new(ExecutorFsm::new(Arc::new(JournalExecutor::new())));
        let log = Arc::new(MemoryLog::new("1", ADDR, fsm.clone()));
        log.bootstrap_cluster(vec![ClusterMember::voter("1", ADDR)])
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(
            log.clone(),
            fsm,
            Arc::new(WriteEndpoints::new(["upsert", "delete"])),
        );
        (log, dispatcher)
    }

    fn request(endpoint: &str, id: &str) -> DataRequest {
        DataRequest::new(endpoint, id, b"doc".to_vec())
    }

    #[tokio::test]
    async fn test_upsert_writes_search_reads() {
        let (log, dispatcher) = setup().await;

        let cases = [("upsert", 1u64), ("search", 1), ("delete", 2), ("search", 2)];
        for (i, (endpoint, commits)) in cases.into_iter().enumerate() {
            let response = dispatcher
                .handle(request(endpoint, &format!("r-{}", i)))
                .await
                .unwrap();
            assert_eq!(response.endpoint(), endpoint);
            assert_eq!(log.commit_count(), commits, "after {}", endpoint);
        }
    }

    #[tokio::test]
    async fn test_read_never_touches_log() {
        let (log, dispatcher) = setup().await;
        log.set_stalled(true);

        let response = dispatcher.handle(request("search", "q-1")).await.unwrap();
        assert_eq!(response.request_id(), "q-1");
        assert_eq!(log.commit_count(), 0);
        assert!(log.entries().await.is_empty());
        assert_eq!(log.local().applied_count(), 0);
    }

    #[tokio::test]
    async fn test_write_returns_committed_response() {
        let (log, dispatcher) = setup().await;

        let response = dispatcher.handle(request("upsert", "w-1")).await.unwrap();
        // The journal stamps its sequence, so this came from the state machine
        assert_eq!(response.parameter("sequence"), Some("1"));
        assert_eq!(log.local().applied_count(), 1);
    }

    #[tokio::test]
    async fn test_resubmission_commits_twice() {
        let (log, dispatcher) = setup().await;

        dispatcher.handle(request("upsert", "dup")).await.unwrap();
        dispatcher.handle(request("upsert", "dup")).await.unwrap();

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entries[1]);
        assert_eq!(
            log.local().executor().request_ids().await,
            vec!["dup", "dup"]
        );
    }

    #[tokio::test]
    async fn test_timeout_is_retriable_with_unknown_outcome() {
        let (log, dispatcher) = setup().await;
        let dispatcher = dispatcher.with_apply_timeout(Duration::from_millis(20));
        log.set_stalled(true);

        let err = dispatcher.handle(request("upsert", "slow")).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(err.commit_status(), CommitStatus::Unknown);
        assert!(matches!(err, DispatchError::Retriable(LogError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_not_leader_is_retriable_and_not_applied() {
        let (log, dispatcher) = setup().await;
        log.demote_to_follower(Some(LeaderInfo {
            id: "2".into(),
            address: "127.0.0.2:50051".into(),
            term: 2,
        }));

        let err = dispatcher.handle(request("upsert", "w-1")).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(err.commit_status(), CommitStatus::NotApplied);
        assert_eq!(err.leader(), Some("127.0.0.2:50051"));
        assert_eq!(log.commit_count(), 0);

        // Reads keep working on a follower
        dispatcher.handle(request("search", "q-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_executor_error_is_committed() {
        let (log, dispatcher) = setup().await;
        log.local()
            .executor()
            .fail_endpoint("delete", "no such document")
            .await;

        let err = dispatcher.handle(request("delete", "d-1")).await.unwrap_err();
        assert!(!err.is_retriable());
        assert_eq!(err.commit_status(), CommitStatus::Applied);
        assert_eq!(
            err,
            DispatchError::Executor(ExecutorError::Rejected("no such document".into()))
        );
        assert_eq!(log.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_read_failure() {
        let (_log, dispatcher) = setup().await;
        dispatcher
            .fsm
            .executor()
            .fail_endpoint("search", "index offline")
            .await;

        let err = dispatcher.handle(request("search", "q-1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Read(ExecutorError::Rejected(_))));
        assert_eq!(err.commit_status(), CommitStatus::NotApplied);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects() {
        let (log, dispatcher) = setup().await;
        dispatcher.close();
        dispatcher.close();

        for endpoint in ["upsert", "search"] {
            let err = dispatcher.handle(request(endpoint, "late")).await.unwrap_err();
            assert_eq!(err, DispatchError::NotAccepting);
            assert!(err.is_retriable());
        }
        assert_eq!(log.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_metadata_stays_local() {
        let (log, dispatcher) = setup().await;
        log.set_stalled(true);

        assert!(dispatcher.endpoints().await.unwrap().is_empty());
        let info = dispatcher.info().await.unwrap();
        assert_eq!(info.name, "journal");
        assert_eq!(info.attributes.get("entries").map(String::as_str), Some("0"));
        assert!(log.entries().await.is_empty());

        dispatcher.close();
        assert_eq!(dispatcher.info().await.unwrap_err(), DispatchError::NotAccepting);
        assert_eq!(
            dispatcher.endpoints().await.unwrap_err(),
            DispatchError::NotAccepting
        );
    }

    /// A log whose state machine produced no response for the entry
    struct EmptyLog;

    impl ConsensusLog for EmptyLog {
        async fn apply(&self, _: Vec<u8>, _: Duration) -> Result<ApplyResult, LogError> {
            Ok(ApplyResult::Empty)
        }

        async fn bootstrap_cluster(&self, _: Vec<ClusterMember>) -> Result<(), MembershipError> {
            Ok(())
        }

        async fn add_voter(&self, _: &str, _: &str, _: Duration) -> Result<(), MembershipError> {
            Ok(())
        }

        async fn remove_server(&self, _: &str, _: Duration) -> Result<(), MembershipError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), LogError> {
            Ok(())
        }

        fn state(&self) -> NodeRole {
            NodeRole::Leader
        }

        fn leader(&self) -> Option<LeaderInfo> {
            None
        }

        fn configuration(&self) -> Vec<ClusterMember> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_empty_result_is_unexpected() {
        let fsm = Arc::new(ExecutorFsm::new(Arc::new(JournalExecutor::new())));
        let dispatcher = Dispatcher::new(
            Arc::new(EmptyLog),
            fsm,
            Arc::new(WriteEndpoints::new(["upsert"])),
        );

        let err = dispatcher.handle(request("upsert", "w-1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnexpectedResult(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_apply_in_commit_order() {
        let replicas: Vec<_> = (0..3)
            .map(|_| Arc::new(ExecutorFsm::new(Arc::new(JournalExecutor::new()))))
            .collect();
        let log = MemoryLog::new("1", ADDR, replicas[0].clone())
            .with_replica(replicas[1].clone())
            .with_replica(replicas[2].clone());
        let log = Arc::new(log);
        log.bootstrap_cluster(vec![ClusterMember::voter("1", ADDR)])
            .await
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            log.clone(),
            replicas[0].clone(),
            Arc::new(WriteEndpoints::new(["upsert"])),
        ));

        let mut tasks = Vec::new();
        for i in 0..50 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.handle(request("upsert", &format!("w-{}", i))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let committed: Vec<String> = log
            .entries()
            .await
            .iter()
            .map(|bytes| {
                serde_json::from_slice::<DataRequest>(bytes)
                    .unwrap()
                    .request_id()
                    .to_string()
            })
            .collect();
        assert_eq!(committed.len(), 50);
        for replica in &replicas {
            assert_eq!(replica.executor().request_ids().await, committed);
        }
    }
}
