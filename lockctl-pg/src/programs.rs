//! Program repository
//!
//! Seeding and lookup outside the update protocol:
//! - create: INSERT ... RETURNING (version starts at the column default)
//! - get: plain read by id

use lockctl_core::{NewRecord, RecordId, VersionedRecord};
use sqlx::{FromRow, PgPool};

use crate::error::DbError;

/// Row shape of the `programs` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ProgramRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub version: i64,
}

impl From<ProgramRow> for VersionedRecord {
    fn from(row: ProgramRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            version: row.version,
        }
    }
}

/// Program repository
pub struct ProgramRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> ProgramRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a program and return it with its generated id.
    pub async fn create(&self, new: &NewRecord) -> Result<VersionedRecord, DbError> {
        let row: ProgramRow = sqlx::query_as(
            r#"
            INSERT INTO programs (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description, version
            "#,
        )
        .bind(&new.name)
        .bind(new.description.as_deref())
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }

    /// Get a single program by id.
    pub async fn get(&self, id: RecordId) -> Result<VersionedRecord, DbError> {
        let row: ProgramRow = sqlx::query_as(
            r#"
            SELECT id, name, description, version
            FROM programs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound {
            resource: "program",
            id: id.to_string(),
        })?;

        Ok(row.into())
    }
}
