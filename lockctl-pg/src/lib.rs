//! lockctl-pg: PostgreSQL backend for the locking update protocol
//!
//! # Design Principles
//!
//! - One transaction per update, held on one pooled connection
//! - Pessimistic reads use `SELECT ... FOR UPDATE`; optimistic writes carry
//!   the version predicate in the `UPDATE` itself (no check-then-write)
//! - SQLSTATEs for lock timeouts, deadlocks and serialization failures map
//!   to typed store errors

pub mod error;
pub mod pool;
pub mod programs;
pub mod schema;
pub mod store;

pub use error::DbError;
pub use pool::{create_pool, create_pool_with_options, DEFAULT_MAX_CONNECTIONS};
pub use programs::ProgramRepo;
pub use schema::ensure_schema;
pub use store::{PgStore, PgTransaction};
