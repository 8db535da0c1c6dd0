//! lockctl-core: optimistic and pessimistic locking updates
//!
//! Guarantees that a stale or concurrently-modified record is never silently
//! overwritten, using either a version-column check at write time or an
//! exclusive row lock held from read to commit.

pub mod error;
pub mod memory;
pub mod protocol;
pub mod record;
pub mod retry;
pub mod store;
pub mod strategy;

pub use error::{BoxError, StoreError, UpdateError};
pub use memory::{MemoryStore, MemoryTransaction};
pub use protocol::{UpdatePhase, UpdateProtocol};
pub use record::{NewRecord, RecordChanges, RecordId, VersionedRecord, INITIAL_VERSION};
pub use retry::RetryPolicy;
pub use store::{RecordStore, RecordTransaction, StoreResult};
pub use strategy::{LockStrategy, ParseStrategyError, ReadMode};
