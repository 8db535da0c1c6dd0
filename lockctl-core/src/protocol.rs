//! Concurrent update protocol
//!
//! One invocation of [`UpdateProtocol::update_record`] runs one transaction:
//!
//! ```text
//! START -> READING -> NOT_FOUND
//!                  -> DECIDING -> COMMITTED | CONFLICT | FAILED
//! ```
//!
//! Optimistic: plain read, then `UPDATE ... WHERE id = ? AND version = ?`.
//! Zero rows means another writer advanced the version in between.
//!
//! Pessimistic: `SELECT ... FOR UPDATE`, then `UPDATE ... WHERE id = ?`.
//! The row lock is held from the read until commit or rollback.
//!
//! Every non-committing exit rolls the transaction back before returning.
//! Using both strategies against the same record is not protected: an
//! optimistic plain read does not wait for a pessimistic lock holder. Pick
//! one strategy per record.

use tracing::{debug, info, instrument, warn, Span};

use crate::error::{Result, StoreError, UpdateError};
use crate::record::{RecordChanges, RecordId, VersionedRecord};
use crate::retry::RetryPolicy;
use crate::store::{RecordStore, RecordTransaction};
use crate::strategy::LockStrategy;

/// Phase an update invocation has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Start,
    Reading,
    NotFound,
    Deciding,
    Committed,
    Conflict,
    Failed,
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Reading => "reading",
            Self::NotFound => "not_found",
            Self::Deciding => "deciding",
            Self::Committed => "committed",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Committed | Self::Conflict | Self::Failed
        )
    }

    /// Terminal phase for a failed invocation
    pub fn of_error(err: &UpdateError) -> Self {
        match err {
            UpdateError::NotFound { .. } => Self::NotFound,
            UpdateError::OptimisticConflict { .. } => Self::Conflict,
            UpdateError::TransactionFailure { .. } => Self::Failed,
        }
    }
}

fn enter(phase: UpdatePhase) {
    Span::current().record("phase", phase.as_str());
}

/// Read-modify-write over a [`RecordStore`] under a caller-selected strategy.
///
/// Holds no state between calls; clone it freely across tasks.
#[derive(Debug, Clone)]
pub struct UpdateProtocol<S> {
    store: S,
}

impl<S: RecordStore> UpdateProtocol<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply `changes` to record `id` in one transaction.
    ///
    /// Returns the stored record with its new version, or a typed failure.
    /// The transaction is committed exactly when `Ok` is returned.
    #[instrument(
        name = "update_record",
        skip(self, changes),
        fields(phase = UpdatePhase::Start.as_str())
    )]
    pub async fn update_record(
        &self,
        id: RecordId,
        changes: &RecordChanges,
        strategy: LockStrategy,
    ) -> Result<VersionedRecord> {
        let mut tx = self.store.begin().await.map_err(|e| {
            enter(UpdatePhase::Failed);
            UpdateError::transaction(id, e)
        })?;

        match read_and_write(&mut tx, id, changes, strategy).await {
            Ok(updated) => match tx.commit().await {
                Ok(()) => {
                    enter(UpdatePhase::Committed);
                    info!(version = updated.version, "update committed");
                    Ok(updated)
                }
                Err(e) => {
                    enter(UpdatePhase::Failed);
                    warn!(error = %e, "commit failed");
                    Err(UpdateError::transaction(id, e))
                }
            },
            Err(err) => {
                enter(UpdatePhase::of_error(&err));
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                debug!(error = %err, "update rolled back");
                Err(err)
            }
        }
    }

    /// Like [`update_record`](Self::update_record), re-reading and retrying
    /// while the outcome is `OptimisticConflict` and `policy` allows.
    ///
    /// `NotFound` and `TransactionFailure` are returned immediately.
    pub async fn update_with_retry(
        &self,
        id: RecordId,
        changes: &RecordChanges,
        strategy: LockStrategy,
        policy: &RetryPolicy,
    ) -> Result<VersionedRecord> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.update_record(id, changes, strategy).await {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(id, attempt, ?delay, "optimistic conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

async fn read_and_write<T: RecordTransaction>(
    tx: &mut T,
    id: RecordId,
    changes: &RecordChanges,
    strategy: LockStrategy,
) -> Result<VersionedRecord> {
    enter(UpdatePhase::Reading);
    let current = tx
        .read_by_id(id, strategy.read_mode())
        .await
        .map_err(|e| UpdateError::transaction(id, e))?
        .ok_or(UpdateError::NotFound { id })?;

    enter(UpdatePhase::Deciding);
    let updated = changes
        .apply_to(&current)
        .ok_or_else(|| UpdateError::transaction(id, StoreError::VersionOverflow { id }))?;
    debug!(from = current.version, to = updated.version, "writing record");

    let rows = match strategy {
        LockStrategy::Optimistic => tx.update_if_version(&updated, current.version).await,
        LockStrategy::Pessimistic => tx.update(&updated).await,
    }
    .map_err(|e| UpdateError::transaction(id, e))?;

    match (strategy, rows) {
        (_, 1) => Ok(updated),
        (LockStrategy::Optimistic, 0) => Err(UpdateError::OptimisticConflict {
            id,
            expected_version: current.version,
        }),
        (_, actual) => Err(UpdateError::transaction(
            id,
            StoreError::UnexpectedRowCount {
                id,
                expected: 1,
                actual,
            },
        )),
    }
}
