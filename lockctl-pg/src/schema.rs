//! Table setup for versioned records

use sqlx::PgPool;

use crate::error::DbError;

/// Create the `programs` table if it does not exist.
///
/// `version` starts at 0 and only ever moves forward through the update
/// protocol.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), DbError> {
    tracing::info!("Ensuring programs table...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS programs (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            version BIGINT NOT NULL DEFAULT 0 CHECK (version >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("programs table ready");
    Ok(())
}
