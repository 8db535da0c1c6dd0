//! PostgreSQL implementation of the record store
//!
//! - plain read: `SELECT ... WHERE id = $1`
//! - locking read: `SELECT ... WHERE id = $1 FOR UPDATE`
//! - optimistic write: `UPDATE ... WHERE id = $4 AND version = $5`
//! - pessimistic write: `UPDATE ... WHERE id = $4`
//!
//! A `PgTransaction` dropped without commit is rolled back by sqlx when its
//! connection returns to the pool.

use std::time::Duration;

use async_trait::async_trait;
use lockctl_core::{
    ReadMode, RecordId, RecordStore, RecordTransaction, StoreResult, VersionedRecord,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::store_error;
use crate::programs::ProgramRow;

const SELECT_PROGRAM_SQL: &str =
    "SELECT id, name, description, version FROM programs WHERE id = $1";

const SELECT_PROGRAM_FOR_UPDATE_SQL: &str =
    "SELECT id, name, description, version FROM programs WHERE id = $1 FOR UPDATE";

const UPDATE_PROGRAM_IF_VERSION_SQL: &str =
    "UPDATE programs SET name = $1, description = $2, version = $3 WHERE id = $4 AND version = $5";

const UPDATE_PROGRAM_SQL: &str =
    "UPDATE programs SET name = $1, description = $2, version = $3 WHERE id = $4";

/// Record store backed by the `programs` table
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Apply `lock_timeout` to every transaction this store begins.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> StoreResult<PgTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", None, e))?;

        if let Some(timeout) = self.lock_timeout {
            // SET LOCAL cannot take bind parameters; set_config(.., true) is the same thing.
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error("set lock_timeout", None, e))?;
        }

        Ok(PgTransaction { tx })
    }
}

/// Open PostgreSQL transaction
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn execute_update(
        &mut self,
        sql: &str,
        record: &VersionedRecord,
        expected_version: Option<i64>,
    ) -> StoreResult<u64> {
        let mut query = sqlx::query(sql)
            .bind(&record.name)
            .bind(record.description.as_deref())
            .bind(record.version)
            .bind(record.id);
        if let Some(expected) = expected_version {
            query = query.bind(expected);
        }

        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error("update program", Some(record.id), e))?;

        debug!(id = record.id, rows = result.rows_affected(), "program updated");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordTransaction for PgTransaction {
    async fn read_by_id(
        &mut self,
        id: RecordId,
        mode: ReadMode,
    ) -> StoreResult<Option<VersionedRecord>> {
        let sql = match mode {
            ReadMode::Plain => SELECT_PROGRAM_SQL,
            ReadMode::ForUpdate => SELECT_PROGRAM_FOR_UPDATE_SQL,
        };

        let row: Option<ProgramRow> = sqlx::query_as(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| store_error("read program", Some(id), e))?;

        Ok(row.map(Into::into))
    }

    async fn update_if_version(
        &mut self,
        record: &VersionedRecord,
        expected_version: i64,
    ) -> StoreResult<u64> {
        self.execute_update(UPDATE_PROGRAM_IF_VERSION_SQL, record, Some(expected_version))
            .await
    }

    async fn update(&mut self, record: &VersionedRecord) -> StoreResult<u64> {
        self.execute_update(UPDATE_PROGRAM_SQL, record, None).await
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| store_error("commit", None, e))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| store_error("rollback", None, e))
    }
}
