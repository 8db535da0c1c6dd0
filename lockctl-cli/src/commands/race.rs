//! Concurrent writers against one record
//!
//! Optimistic writers mostly conflict (one winner per overlapping window,
//! unless retries are allowed); pessimistic writers queue on the row lock
//! and all commit.

use anyhow::{bail, Context, Result};
use clap::Parser;
use lockctl_core::{
    LockStrategy, MemoryStore, NewRecord, ReadMode, RecordChanges, RecordId, RecordStore,
    RecordTransaction, RetryPolicy, UpdateError, UpdateProtocol, VersionedRecord,
};
use serde::Serialize;
use tracing::{info, warn};

use super::CommandContext;

#[derive(Parser, Debug)]
pub struct RaceArgs {
    /// Record id (not needed with --in-memory)
    pub id: Option<RecordId>,

    /// Number of concurrent writers
    #[arg(long, default_value_t = 2)]
    pub writers: usize,

    /// Concurrency-control strategy: optimistic or pessimistic
    #[arg(long, default_value_t = LockStrategy::Optimistic)]
    pub strategy: LockStrategy,

    /// Retries after an optimistic conflict
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Race against a seeded in-memory record instead of PostgreSQL
    #[arg(long)]
    pub in_memory: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Outcome counts of one race
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RaceReport {
    pub strategy: LockStrategy,
    pub writers: usize,
    pub committed: usize,
    pub conflicts: usize,
    pub not_found: usize,
    pub failed: usize,
    #[serde(rename = "final")]
    pub final_record: Option<VersionedRecord>,
}

impl RaceReport {
    fn record(&mut self, outcome: &Result<VersionedRecord, UpdateError>) {
        match outcome {
            Ok(_) => self.committed += 1,
            Err(UpdateError::OptimisticConflict { .. }) => self.conflicts += 1,
            Err(UpdateError::NotFound { .. }) => self.not_found += 1,
            Err(err @ UpdateError::TransactionFailure { .. }) => {
                warn!(id = err.id(), error = %err, "writer failed");
                self.failed += 1;
            }
        }
    }

    fn print(&self) {
        println!("strategy:      {}", self.strategy);
        println!("writers:       {}", self.writers);
        println!("committed:     {}", self.committed);
        println!("conflicts:     {}", self.conflicts);
        println!("not found:     {}", self.not_found);
        println!("failed:        {}", self.failed);
        match &self.final_record {
            Some(record) => println!("final version: {} ({})", record.version, record.name),
            None => println!("final version: -"),
        }
    }
}

pub async fn run_race(ctx: &CommandContext, args: RaceArgs) -> Result<()> {
    if args.writers == 0 {
        bail!("--writers must be at least 1");
    }
    let strategy = args.strategy;
    let policy = RetryPolicy::default().with_max_attempts(args.retries.saturating_add(1));

    let report = if args.in_memory {
        let store = MemoryStore::new();
        let seeded = store.insert(NewRecord::new("race").with_description("in-memory"));
        race(store, seeded.id, args.writers, strategy, policy).await?
    } else {
        let Some(id) = args.id else {
            bail!("record id required unless --in-memory is set");
        };
        race(ctx.connect().await?, id, args.writers, strategy, policy).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }
    Ok(())
}

/// Spawn `writers` concurrent updates of record `id` and tally the outcomes.
pub async fn race<S>(
    store: S,
    id: RecordId,
    writers: usize,
    strategy: LockStrategy,
    policy: RetryPolicy,
) -> Result<RaceReport>
where
    S: RecordStore + Clone + 'static,
{
    info!(id, writers, %strategy, "starting race");
    let protocol = UpdateProtocol::new(store);

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let protocol = protocol.clone();
            tokio::spawn(async move {
                let changes = RecordChanges::new(format!("writer-{i}"));
                protocol
                    .update_with_retry(id, &changes, strategy, &policy)
                    .await
            })
        })
        .collect();

    let mut report = RaceReport {
        strategy,
        writers,
        ..Default::default()
    };
    for handle in handles {
        let outcome = handle.await.context("writer task panicked")?;
        report.record(&outcome);
    }

    let mut tx = protocol.store().begin().await?;
    report.final_record = tx.read_by_id(id, ReadMode::Plain).await?;
    tx.rollback().await?;

    Ok(report)
}
