//! Error types for lockctl-pg

use lockctl_core::{RecordId, StoreError};

/// SQLSTATE raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";

const DEADLOCK_DETECTED: &str = "40P01";

const SERIALIZATION_FAILURE: &str = "40001";

/// Database error type for repository helpers
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found: {resource} '{id}'")]
    NotFound { resource: &'static str, id: String },
}

/// Translate a sqlx failure inside a transaction into the store taxonomy.
///
/// `id` is the row the statement targeted, if any; lock timeouts without a
/// row fall through to `StoreError::Backend`.
pub(crate) fn store_error(context: &str, id: Option<RecordId>, err: sqlx::Error) -> StoreError {
    let code = match &err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    };

    match (code.as_deref(), id) {
        (Some(LOCK_NOT_AVAILABLE), Some(id)) => StoreError::LockTimeout { id },
        (Some(DEADLOCK_DETECTED), _) => StoreError::Deadlock,
        (Some(SERIALIZATION_FAILURE), _) => StoreError::SerializationFailure,
        _ => StoreError::backend(context, err),
    }
}
