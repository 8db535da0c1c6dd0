//! In-memory transactional store
//!
//! Behaves like a row-locking SQL database at READ COMMITTED:
//! - plain reads see the latest committed row (or this transaction's own
//!   pending write) and never block
//! - `ForUpdate` reads take the row's exclusive lock
//! - both update operations take the row lock first, as `UPDATE` does, then
//!   evaluate their predicate against the latest committed row
//! - writes stay private until commit; commit publishes them and only then
//!   releases the locks
//!
//! Used by the tests and by `lockctl race --in-memory`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

use crate::error::StoreError;
use crate::record::{NewRecord, RecordId, VersionedRecord, INITIAL_VERSION};
use crate::store::{RecordStore, RecordTransaction, StoreResult};
use crate::strategy::ReadMode;

/// Shared in-memory table of versioned records
#[derive(Clone, Default)]
pub struct MemoryStore {
    table: Arc<Mutex<Table>>,
    lock_timeout: Option<Duration>,
}

#[derive(Default)]
struct Table {
    last_id: RecordId,
    rows: HashMap<RecordId, Row>,
}

struct Row {
    committed: VersionedRecord,
    lock: Arc<RowLock<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail lock waits longer than `timeout` with `StoreError::LockTimeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Insert a record with the next id and the initial version.
    pub fn insert(&self, new: NewRecord) -> VersionedRecord {
        let mut table = self.table.lock();
        table.last_id += 1;
        let record = VersionedRecord {
            id: table.last_id,
            name: new.name,
            description: new.description,
            version: INITIAL_VERSION,
        };
        table.rows.insert(
            record.id,
            Row {
                committed: record.clone(),
                lock: Arc::new(RowLock::new(())),
            },
        );
        record
    }

    /// Insert a record as-is, replacing any row with the same id.
    ///
    /// Lets tests start from an arbitrary version.
    pub fn put(&self, record: VersionedRecord) {
        let mut table = self.table.lock();
        table.last_id = table.last_id.max(record.id);
        table.rows.insert(
            record.id,
            Row {
                committed: record,
                lock: Arc::new(RowLock::new(())),
            },
        );
    }

    /// Latest committed value of a record.
    pub fn get(&self, id: RecordId) -> Option<VersionedRecord> {
        self.table.lock().rows.get(&id).map(|row| row.committed.clone())
    }

    pub fn len(&self) -> usize {
        self.table.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            table: Arc::clone(&self.table),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            pending: HashMap::new(),
            finished: false,
        })
    }
}

/// Open transaction on a [`MemoryStore`]
pub struct MemoryTransaction {
    table: Arc<Mutex<Table>>,
    lock_timeout: Option<Duration>,
    held: HashMap<RecordId, OwnedMutexGuard<()>>,
    pending: HashMap<RecordId, VersionedRecord>,
    finished: bool,
}

impl MemoryTransaction {
    /// Acquire the row lock unless already held. Returns false if the row does not exist.
    async fn lock_row(&mut self, id: RecordId) -> StoreResult<bool> {
        if self.held.contains_key(&id) {
            return Ok(true);
        }

        let Some(lock) = self.row_lock(id) else {
            return Ok(false);
        };

        let guard = match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout { id })?,
            None => lock.lock_owned().await,
        };
        debug!(id, "row lock acquired");
        self.held.insert(id, guard);
        Ok(true)
    }

    fn row_lock(&self, id: RecordId) -> Option<Arc<RowLock<()>>> {
        self.table.lock().rows.get(&id).map(|row| Arc::clone(&row.lock))
    }

    fn visible(&self, id: RecordId) -> Option<VersionedRecord> {
        if let Some(record) = self.pending.get(&id) {
            return Some(record.clone());
        }
        self.table.lock().rows.get(&id).map(|row| row.committed.clone())
    }
}

#[async_trait]
impl RecordTransaction for MemoryTransaction {
    async fn read_by_id(
        &mut self,
        id: RecordId,
        mode: ReadMode,
    ) -> StoreResult<Option<VersionedRecord>> {
        if mode == ReadMode::ForUpdate && !self.lock_row(id).await? {
            return Ok(None);
        }
        Ok(self.visible(id))
    }

    async fn update_if_version(
        &mut self,
        record: &VersionedRecord,
        expected_version: i64,
    ) -> StoreResult<u64> {
        if !self.lock_row(record.id).await? {
            return Ok(0);
        }
        match self.visible(record.id) {
            Some(current) if current.version == expected_version => {
                self.pending.insert(record.id, record.clone());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update(&mut self, record: &VersionedRecord) -> StoreResult<u64> {
        if !self.lock_row(record.id).await? {
            return Ok(0);
        }
        self.pending.insert(record.id, record.clone());
        Ok(1)
    }

    async fn commit(mut self) -> StoreResult<()> {
        {
            let mut table = self.table.lock();
            for (id, record) in self.pending.drain() {
                if let Some(row) = table.rows.get_mut(&id) {
                    row.committed = record;
                }
            }
        }
        self.finished = true;
        // Row locks are released when `self` drops, after the writes are visible.
        Ok(())
    }

    async fn rollback(mut self) -> StoreResult<()> {
        self.pending.clear();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished && (!self.pending.is_empty() || !self.held.is_empty()) {
            debug!(
                pending = self.pending.len(),
                locks = self.held.len(),
                "transaction dropped while open, rolling back"
            );
        }
    }
}
