//! Subcommand implementations

pub mod race;
pub mod records;

use anyhow::{Context, Result};
use lockctl_core::VersionedRecord;
use lockctl_pg::PgStore;
use tracing::debug;

use crate::config::LockctlConfig;

pub use race::{run_race, RaceArgs};
pub use records::{run_create, run_init, run_show, run_update, CreateArgs, ShowArgs, UpdateArgs};

/// Resolved settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: LockctlConfig,
    pub database_url: String,
}

impl CommandContext {
    pub fn new(config: LockctlConfig, database_url_flag: Option<&str>) -> Self {
        let database_url = config.database_url(database_url_flag);
        Self {
            config,
            database_url,
        }
    }

    /// Open a pool and wrap it in a store carrying the configured lock timeout.
    pub async fn connect(&self) -> Result<PgStore> {
        debug!(max_connections = self.config.max_connections(), "connecting to database");
        let pool = lockctl_pg::create_pool_with_options(
            &self.database_url,
            self.config.max_connections(),
        )
        .await
        .context("Failed to connect to database (set DATABASE_URL or --database-url)")?;

        let store = PgStore::new(pool);
        Ok(match self.config.lock_timeout() {
            Some(timeout) => store.with_lock_timeout(timeout),
            None => store,
        })
    }
}

pub(crate) fn print_record(record: &VersionedRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(record)?);
        return Ok(());
    }

    println!("id:          {}", record.id);
    println!("name:        {}", record.name);
    println!(
        "description: {}",
        record.description.as_deref().unwrap_or("-")
    );
    println!("version:     {}", record.version);
    Ok(())
}
