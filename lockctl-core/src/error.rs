//! Structured error types for lockctl-core.
//!
//! `StoreError` is what a transactional store reports; `UpdateError` is the
//! taxonomy callers of the update protocol see. The binary (lockctl-cli)
//! wraps both in `anyhow`.

use thiserror::Error;

use crate::record::RecordId;

/// Boxed error from a concrete store backend
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a transactional store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Waiting for a row lock exceeded the configured timeout
    #[error("lock wait timed out on record {id}")]
    LockTimeout { id: RecordId },

    /// The store aborted this transaction to break a deadlock
    #[error("transaction aborted by deadlock detection")]
    Deadlock,

    /// The store could not serialize this transaction
    #[error("transaction could not be serialized")]
    SerializationFailure,

    /// A write touched a different number of rows than the protocol requires
    #[error("expected {expected} row(s) affected for record {id}, got {actual}")]
    UnexpectedRowCount {
        id: RecordId,
        expected: u64,
        actual: u64,
    },

    /// The stored version cannot be incremented any further
    #[error("version of record {id} cannot be incremented")]
    VersionOverflow { id: RecordId },

    /// Any other backend failure (I/O, protocol, pool)
    #[error("store error during {context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    /// Wrap a backend error with the operation that produced it
    pub fn backend(
        context: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Result of a single `update_record` invocation that did not commit
#[derive(Error, Debug)]
pub enum UpdateError {
    /// No record with the id existed at read time
    #[error("record {id} not found")]
    NotFound { id: RecordId },

    /// The version predicate failed at write time; retry from a fresh read
    #[error("record {id} was modified concurrently (expected version {expected_version})")]
    OptimisticConflict {
        id: RecordId,
        expected_version: i64,
    },

    /// Infrastructure failure; the transaction was rolled back
    #[error("transaction on record {id} failed: {source}")]
    TransactionFailure {
        id: RecordId,
        #[source]
        source: StoreError,
    },
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, UpdateError>;

impl UpdateError {
    pub fn transaction(id: RecordId, source: StoreError) -> Self {
        Self::TransactionFailure { id, source }
    }

    /// Only optimistic conflicts are worth retrying from a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OptimisticConflict { .. })
    }

    pub fn id(&self) -> RecordId {
        match self {
            Self::NotFound { id }
            | Self::OptimisticConflict { id, .. }
            | Self::TransactionFailure { id, .. } => *id,
        }
    }
}
