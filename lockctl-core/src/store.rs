//! Transactional store seam
//!
//! The update protocol consumes a store through these two traits. A
//! transaction value owns its transaction end to end: it must either be
//! committed, rolled back, or dropped. Dropping an open transaction rolls it
//! back and releases every row lock it holds, which covers panics and
//! cancelled tasks.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{RecordId, VersionedRecord};
use crate::strategy::ReadMode;

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Source of transactions over versioned records
#[async_trait]
pub trait RecordStore: Send + Sync {
    type Tx: RecordTransaction;

    /// Begin a new transaction.
    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One open transaction
#[async_trait]
pub trait RecordTransaction: Send {
    /// Read a record by id.
    ///
    /// `ReadMode::ForUpdate` acquires an exclusive row lock held until the
    /// transaction ends; other locking reads and writes on the row block.
    async fn read_by_id(
        &mut self,
        id: RecordId,
        mode: ReadMode,
    ) -> StoreResult<Option<VersionedRecord>>;

    /// `UPDATE ... SET fields, version = record.version WHERE id = record.id AND version = expected_version`
    ///
    /// Returns the number of rows affected (0 when the stored version moved on).
    async fn update_if_version(
        &mut self,
        record: &VersionedRecord,
        expected_version: i64,
    ) -> StoreResult<u64>;

    /// `UPDATE ... SET fields, version = record.version WHERE id = record.id`
    async fn update(&mut self, record: &VersionedRecord) -> StoreResult<u64>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}
