//! Raft state machine over an executor
//!
//! Committed entries are handed to the `ExecutorFsm`, which owns the
//! executor-facing half. This side tracks what OpenRaft needs: the last
//! applied log id, the membership, and the latest snapshot, which is also
//! persisted to `snapshot.json` so a restarted node can restore from it.

use crate::types::{
    RaftEntry, RaftLogId, RaftSnapshot, RaftSnapshotMeta, RaftStorageError, RaftStoredMembership,
    TypeConfig,
};
use jraft_core::ApplyResult;
use jraft_executor::{Executor, ExecutorFsm};
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine};
use openraft::{EntryPayload, OptionalSend, SnapshotMeta, StorageIOError, StoredMembership};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const SNAPSHOT_FILE: &str = "snapshot.json";

/// What the state machine has applied so far
#[derive(Clone, Debug, Default)]
struct AppliedState {
    last_applied: Option<RaftLogId>,
    membership: RaftStoredMembership,
}

/// Snapshot data as shipped between nodes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotPayload {
    /// Output of `Executor::export_state`
    pub executor_state: Option<Vec<u8>>,
}

/// Snapshot as persisted on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub meta: RaftSnapshotMeta,
    pub data: Vec<u8>,
}

/// Executor State Machine
///
/// Applies Raft log entries to the executor
pub struct ExecutorStateMachine<E> {
    fsm: Arc<ExecutorFsm<E>>,

    state: RwLock<AppliedState>,

    /// Latest snapshot, built locally or installed from the leader
    current_snapshot: RwLock<Option<StoredSnapshot>>,

    snapshot_path: PathBuf,

    snapshot_idx: AtomicU64,
}

impl<E: Executor> ExecutorStateMachine<E> {
    /// Create the state machine, loading the persisted snapshot from `dir`
    ///
    /// With `restore` the executor state is imported from the snapshot. Without
    /// it the executor is expected to have recovered on its own; only the
    /// applied position is taken from the snapshot.
    pub async fn open(
        fsm: Arc<ExecutorFsm<E>>,
        dir: impl AsRef<Path>,
        restore: bool,
    ) -> Result<Self, RaftStorageError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageIOError::write_snapshot(None, &e))?;

        let sm = Self {
            fsm,
            state: RwLock::new(AppliedState::default()),
            current_snapshot: RwLock::new(None),
            snapshot_path: dir.join(SNAPSHOT_FILE),
            snapshot_idx: AtomicU64::new(0),
        };

        if let Some(stored) = sm.load().await? {
            let signature = stored.meta.signature();
            if restore {
                let payload: SnapshotPayload = serde_json::from_slice(&stored.data)
                    .map_err(|e| StorageIOError::read_snapshot(Some(signature.clone()), &e))?;
                if let Some(executor_state) = payload.executor_state {
                    sm.fsm
                        .restore(executor_state)
                        .await
                        .map_err(|e| StorageIOError::read_snapshot(Some(signature.clone()), &e))?;
                }
            }

            tracing::info!(
                snapshot_id = %stored.meta.snapshot_id,
                restore,
                "loaded persisted snapshot"
            );

            *sm.state.write().await = AppliedState {
                last_applied: stored.meta.last_log_id,
                membership: stored.meta.last_membership.clone(),
            };
            *sm.current_snapshot.write().await = Some(stored);
        }

        Ok(sm)
    }

    pub fn fsm(&self) -> &Arc<ExecutorFsm<E>> {
        &self.fsm
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub async fn last_applied(&self) -> Option<RaftLogId> {
        self.state.read().await.last_applied
    }

    async fn load(&self) -> Result<Option<StoredSnapshot>, RaftStorageError> {
        let data = match tokio::fs::read(&self.snapshot_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageIOError::read_snapshot(None, &e).into()),
        };
        let stored =
            serde_json::from_slice(&data).map_err(|e| StorageIOError::read_snapshot(None, &e))?;
        Ok(Some(stored))
    }

    /// Write the snapshot next to the log, replacing the previous one atomically
    async fn persist(&self, snapshot: &StoredSnapshot) -> Result<(), RaftStorageError> {
        let signature = snapshot.meta.signature();
        let data = serde_json::to_vec(snapshot)
            .map_err(|e| StorageIOError::write_snapshot(Some(signature.clone()), &e))?;

        let tmp = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StorageIOError::write_snapshot(Some(signature.clone()), &e))?;
        tokio::fs::rename(&tmp, &self.snapshot_path)
            .await
            .map_err(|e| StorageIOError::write_snapshot(Some(signature), &e))?;
        Ok(())
    }
}

impl<E: Executor> RaftSnapshotBuilder<TypeConfig> for Arc<ExecutorStateMachine<E>> {
    async fn build_snapshot(&mut self) -> Result<RaftSnapshot, RaftStorageError> {
        let state = self.state.read().await;

        let executor_state = self
            .fsm
            .snapshot()
            .await
            .map_err(|e| StorageIOError::read_state_machine(&e))?;
        let data = serde_json::to_vec(&SnapshotPayload { executor_state })
            .map_err(|e| StorageIOError::read_state_machine(&e))?;

        let last_applied = state.last_applied;
        let membership = state.membership.clone();

        // Lock snapshot before releasing state lock
        let mut current_snapshot = self.current_snapshot.write().await;
        drop(state);

        let snapshot_idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match last_applied {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx),
            None => format!("--{}", snapshot_idx),
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership: membership,
            snapshot_id,
        };

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        self.persist(&stored).await?;
        *current_snapshot = Some(stored);

        tracing::info!(snapshot_id = %meta.snapshot_id, size = data.len(), "built snapshot");

        Ok(RaftSnapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl<E: Executor> RaftStateMachine<TypeConfig> for Arc<ExecutorStateMachine<E>> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<RaftLogId>, RaftStoredMembership), RaftStorageError> {
        let state = self.state.read().await;
        Ok((state.last_applied, state.membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<ApplyResult>, RaftStorageError>
    where
        I: IntoIterator<Item = RaftEntry> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();
        let mut state = self.state.write().await;

        for entry in entries {
            tracing::debug!(%entry.log_id, "applying to state machine");

            state.last_applied = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => responses.push(ApplyResult::Empty),
                EntryPayload::Normal(command) => {
                    responses.push(self.fsm.apply(&command.0).await);
                }
                EntryPayload::Membership(membership) => {
                    state.membership = StoredMembership::new(Some(entry.log_id), membership);
                    responses.push(ApplyResult::Empty);
                }
            }
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(&mut self) -> Result<Box<Cursor<Vec<u8>>>, RaftStorageError> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &RaftSnapshotMeta,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), RaftStorageError> {
        tracing::info!(
            snapshot_id = %meta.snapshot_id,
            size = snapshot.get_ref().len(),
            "installing snapshot"
        );

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: snapshot.into_inner(),
        };

        let payload: SnapshotPayload = serde_json::from_slice(&stored.data)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;

        let mut state = self.state.write().await;
        if let Some(executor_state) = payload.executor_state {
            self.fsm
                .restore(executor_state)
                .await
                .map_err(|e| StorageIOError::write_state_machine(&e))?;
        }
        state.last_applied = meta.last_log_id;
        state.membership = meta.last_membership.clone();

        // Lock snapshot before releasing state lock
        let mut current_snapshot = self.current_snapshot.write().await;
        drop(state);

        self.persist(&stored).await?;
        *current_snapshot = Some(stored);
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<RaftSnapshot>, RaftStorageError> {
        match &*self.current_snapshot.read().await {
            Some(snapshot) => Ok(Some(RaftSnapshot {
                meta: snapshot.meta.clone(),
                snapshot: Box::new(Cursor::new(snapshot.data.clone())),
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogCommand;
    use jraft_core::{encode_command, DataRequest};
    use jraft_executor::JournalExecutor;
    use openraft::CommittedLeaderId;
    use tempfile::TempDir;

    fn normal(index: u64, request_id: &str) -> RaftEntry {
        let request = DataRequest::new("upsert", request_id, Vec::new());
        RaftEntry {
            log_id: RaftLogId::new(CommittedLeaderId::new(1, 1), index),
            payload: EntryPayload::Normal(LogCommand(encode_command(&request).unwrap())),
        }
    }

    fn blank(index: u64) -> RaftEntry {
        RaftEntry {
            log_id: RaftLogId::new(CommittedLeaderId::new(1, 1), index),
            payload: EntryPayload::Blank,
        }
    }

    async fn open(dir: &Path, restore: bool) -> Arc<ExecutorStateMachine<JournalExecutor>> {
        let fsm = Arc::new(ExecutorFsm::new(Arc::new(JournalExecutor::new())));
        Arc::new(ExecutorStateMachine::open(fsm, dir, restore).await.unwrap())
    }

    #[tokio::test]
    async fn test_apply_in_order() {
        let dir = TempDir::new().unwrap();
        let mut sm = open(dir.path(), true).await;

        let results = sm
            .apply(vec![blank(1), normal(2, "a"), normal(3, "b")])
            .await
            .unwrap();

        assert_eq!(results[0], ApplyResult::Empty);
        assert!(results[1].is_response());
        assert!(results[2].is_response());
        assert_eq!(sm.fsm().executor().request_ids().await, vec!["a", "b"]);
        assert_eq!(sm.last_applied().await.map(|l| l.index), Some(3));
    }

    #[tokio::test]
    async fn test_snapshot_is_persisted_and_restored() {
        let dir = TempDir::new().unwrap();
        {
            let mut sm = open(dir.path(), true).await;
            sm.apply(vec![normal(1, "a"), normal(2, "b")]).await.unwrap();
            let snapshot = sm.build_snapshot().await.unwrap();
            assert_eq!(snapshot.meta.last_log_id.map(|l| l.index), Some(2));
            assert!(sm.snapshot_path().exists());
        }

        let mut sm = open(dir.path(), true).await;
        assert_eq!(sm.fsm().executor().request_ids().await, vec!["a", "b"]);
        let (last_applied, _) = sm.applied_state().await.unwrap();
        assert_eq!(last_applied.map(|l| l.index), Some(2));
        assert!(sm.get_current_snapshot().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_skip_restore_keeps_applied_position() {
        let dir = TempDir::new().unwrap();
        {
            let mut sm = open(dir.path(), true).await;
            sm.apply(vec![normal(1, "a")]).await.unwrap();
            sm.build_snapshot().await.unwrap();
        }

        let sm = open(dir.path(), false).await;
        assert!(sm.fsm().executor().is_empty().await);
        assert_eq!(sm.last_applied().await.map(|l| l.index), Some(1));
    }

    #[tokio::test]
    async fn test_install_snapshot_from_leader() {
        let leader_dir = TempDir::new().unwrap();
        let mut leader = open(leader_dir.path(), true).await;
        leader
            .apply(vec![normal(1, "a"), normal(2, "b"), normal(3, "c")])
            .await
            .unwrap();
        let snapshot = leader.build_snapshot().await.unwrap();

        let follower_dir = TempDir::new().unwrap();
        let mut follower = open(follower_dir.path(), true).await;
        follower
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .unwrap();

        assert_eq!(
            follower.fsm().executor().request_ids().await,
            vec!["a", "b", "c"]
        );
        assert_eq!(follower.last_applied().await.map(|l| l.index), Some(3));
        assert!(follower.snapshot_path().exists());
    }
}
