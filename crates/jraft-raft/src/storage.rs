//! Raft log storage implementation using RocksDB
//!
//! OpenRaft requires two storage traits:
//! - RaftLogStorage: for storing log entries (here)
//! - RaftStateMachine: for applying committed entries (see state_machine.rs)

use crate::types::{RaftEntry, RaftLogId, RaftStorageError, RaftVote, TypeConfig};
use openraft::storage::{LogFlushed, RaftLogStorage};
use openraft::{LogState, OptionalSend, RaftLogReader, StorageIOError};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Column family names
const CF_LOGS: &str = "logs";
const CF_META: &str = "meta";

/// Metadata keys
const KEY_VOTE: &[u8] = b"vote";
const KEY_COMMITTED: &[u8] = b"committed";
const KEY_LAST_PURGED: &[u8] = b"last_purged";

/// Metadata mirrored in memory
#[derive(Debug, Default)]
struct LogMeta {
    vote: Option<RaftVote>,
    committed: Option<RaftLogId>,
    last_purged: Option<RaftLogId>,
}

/// RocksDB-backed log storage
///
/// Entries live in the `logs` column family keyed by big-endian index, so
/// key order is log order. Vote, commit and purge markers live in `meta`.
#[derive(Clone)]
pub struct RocksLogStore {
    db: Arc<DB>,
    meta: Arc<RwLock<LogMeta>>,
}

impl RocksLogStore {
    /// Open (or create) the store under `<dir>/raft-log`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RaftStorageError> {
        let path = dir.as_ref().join("raft-log");
        std::fs::create_dir_all(&path).map_err(|e| StorageIOError::write(&e))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LOGS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
            .map_err(|e| StorageIOError::read(&e))?;

        let store = Self {
            db: Arc::new(db),
            meta: Arc::new(RwLock::new(LogMeta::default())),
        };

        let meta = LogMeta {
            vote: store.get_meta(KEY_VOTE)?,
            committed: store.get_meta(KEY_COMMITTED)?,
            last_purged: store.get_meta(KEY_LAST_PURGED)?,
        };
        tracing::debug!(path = %path.display(), ?meta, "opened raft log store");

        Ok(Self {
            meta: Arc::new(RwLock::new(meta)),
            ..store
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, RaftStorageError> {
        self.db.cf_handle(name).ok_or_else(|| {
            let e = std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("column family {} not found", name),
            );
            StorageIOError::read(&e).into()
        })
    }

    /// Convert log index to RocksDB key
    fn log_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn get_meta<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, RaftStorageError> {
        let data = self
            .db
            .get_cf(self.cf(CF_META)?, key)
            .map_err(|e| StorageIOError::read(&e))?;
        match data {
            Some(data) => {
                let value = serde_json::from_slice(&data).map_err(|e| StorageIOError::read(&e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_meta<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), RaftStorageError> {
        let data = serde_json::to_vec(value).map_err(|e| StorageIOError::write(&e))?;
        self.db
            .put_cf(self.cf(CF_META)?, key, data)
            .map_err(|e| StorageIOError::write(&e))?;
        Ok(())
    }

    /// Persist entries in a single batch
    fn write_entries(
        &self,
        entries: impl IntoIterator<Item = RaftEntry>,
    ) -> Result<(), RaftStorageError> {
        let cf = self.cf(CF_LOGS)?;
        let mut batch = WriteBatch::default();
        for entry in entries {
            let value = serde_json::to_vec(&entry).map_err(|e| StorageIOError::write_logs(&e))?;
            batch.put_cf(cf, Self::log_key(entry.log_id.index), value);
        }
        self.db
            .write(batch)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    /// Delete entries with index in `[from, to)`
    fn delete_entries(&self, from: u64, to: u64) -> Result<(), RaftStorageError> {
        self.db
            .delete_range_cf(self.cf(CF_LOGS)?, Self::log_key(from), Self::log_key(to))
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    /// Sync the WAL so acknowledged log writes survive a crash
    fn sync_logs(&self) -> Result<(), RaftStorageError> {
        self.db
            .flush_wal(true)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    fn last_entry(&self) -> Result<Option<RaftEntry>, RaftStorageError> {
        let mut iter = self.db.iterator_cf(self.cf(CF_LOGS)?, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (_, value) = item.map_err(|e| StorageIOError::read_logs(&e))?;
                let entry =
                    serde_json::from_slice(&value).map_err(|e| StorageIOError::read_logs(&e))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

impl RaftLogReader<TypeConfig> for RocksLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<RaftEntry>, RaftStorageError> {
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };

        let start_key = Self::log_key(start);
        let iter = self.db.iterator_cf(
            self.cf(CF_LOGS)?,
            IteratorMode::From(&start_key[..], Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StorageIOError::read_logs(&e))?;
            let mut index = [0u8; 8];
            index.copy_from_slice(&key);
            if !range.contains(&u64::from_be_bytes(index)) {
                break;
            }
            let entry: RaftEntry =
                serde_json::from_slice(&value).map_err(|e| StorageIOError::read_logs(&e))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for RocksLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, RaftStorageError> {
        let last_purged = self.meta.read().await.last_purged;
        let last_log_id = self.last_entry()?.map(|e| e.log_id).or(last_purged);

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn save_committed(
        &mut self,
        committed: Option<RaftLogId>,
    ) -> Result<(), RaftStorageError> {
        let mut meta = self.meta.write().await;
        match committed {
            Some(ref c) => self.put_meta(KEY_COMMITTED, c)?,
            None => self
                .db
                .delete_cf(self.cf(CF_META)?, KEY_COMMITTED)
                .map_err(|e| StorageIOError::write(&e))?,
        }
        meta.committed = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<RaftLogId>, RaftStorageError> {
        Ok(self.meta.read().await.committed)
    }

    async fn save_vote(&mut self, vote: &RaftVote) -> Result<(), RaftStorageError> {
        let mut meta = self.meta.write().await;
        let data = serde_json::to_vec(vote).map_err(|e| StorageIOError::write_vote(&e))?;
        self.db
            .put_cf(self.cf(CF_META)?, KEY_VOTE, data)
            .map_err(|e| StorageIOError::write_vote(&e))?;
        self.db
            .flush_wal(true)
            .map_err(|e| StorageIOError::write_vote(&e))?;
        meta.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<RaftVote>, RaftStorageError> {
        Ok(self.meta.read().await.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), RaftStorageError>
    where
        I: IntoIterator<Item = RaftEntry> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        self.write_entries(entries)?;
        self.sync_logs()?;
        // Reported only once the entries are on disk
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: RaftLogId) -> Result<(), RaftStorageError> {
        tracing::debug!(%log_id, "truncating log");
        self.delete_entries(log_id.index, u64::MAX)?;
        self.sync_logs()
    }

    async fn purge(&mut self, log_id: RaftLogId) -> Result<(), RaftStorageError> {
        tracing::debug!(%log_id, "purging log");
        let mut meta = self.meta.write().await;
        self.put_meta(KEY_LAST_PURGED, &log_id)?;
        meta.last_purged = Some(log_id);
        drop(meta);

        self.delete_entries(0, log_id.index + 1)
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}
