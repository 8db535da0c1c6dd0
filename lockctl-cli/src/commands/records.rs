use anyhow::{Context, Result};
use clap::Parser;
use lockctl_core::{LockStrategy, NewRecord, RecordChanges, RecordId, RetryPolicy, UpdateProtocol};
use lockctl_pg::{ensure_schema, ProgramRepo};
use tracing::info;

use super::{print_record, CommandContext};

#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// Program name
    #[arg(long)]
    pub name: String,

    /// Program description
    #[arg(long)]
    pub description: Option<String>,

    /// Print the record as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Record id
    pub id: RecordId,

    /// Print the record as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Record id
    pub id: RecordId,

    /// New name
    #[arg(long)]
    pub name: String,

    /// New description (omit to clear it)
    #[arg(long)]
    pub description: Option<String>,

    /// Concurrency-control strategy: optimistic or pessimistic
    #[arg(long, default_value_t = LockStrategy::Optimistic)]
    pub strategy: LockStrategy,

    /// Retries after an optimistic conflict (default: from config)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Print the record as JSON
    #[arg(long)]
    pub json: bool,
}

impl UpdateArgs {
    pub fn changes(&self) -> RecordChanges {
        RecordChanges {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    pub fn retry_policy(&self, configured: RetryPolicy) -> RetryPolicy {
        match self.retries {
            Some(retries) => configured.with_max_attempts(retries.saturating_add(1)),
            None => configured,
        }
    }
}

pub async fn run_init(ctx: &CommandContext) -> Result<()> {
    let store = ctx.connect().await?;
    ensure_schema(store.pool())
        .await
        .context("Failed to create programs table")?;
    println!("programs table ready");
    Ok(())
}

pub async fn run_create(ctx: &CommandContext, args: CreateArgs) -> Result<()> {
    let store = ctx.connect().await?;
    let new = NewRecord {
        name: args.name,
        description: args.description,
    };

    let created = ProgramRepo::new(store.pool())
        .create(&new)
        .await
        .context("Failed to create program")?;
    info!(id = created.id, "program created");

    print_record(&created, args.json)
}

pub async fn run_show(ctx: &CommandContext, args: ShowArgs) -> Result<()> {
    let store = ctx.connect().await?;
    let record = ProgramRepo::new(store.pool())
        .get(args.id)
        .await
        .with_context(|| format!("Failed to load program {}", args.id))?;

    print_record(&record, args.json)
}

pub async fn run_update(ctx: &CommandContext, args: UpdateArgs) -> Result<()> {
    let store = ctx.connect().await?;
    let protocol = UpdateProtocol::new(store);
    let policy = args.retry_policy(ctx.config.retry_policy());
    let strategy = args.strategy;

    info!(
        id = args.id,
        %strategy,
        max_attempts = policy.max_attempts,
        "updating program"
    );

    let updated = protocol
        .update_with_retry(args.id, &args.changes(), strategy, &policy)
        .await
        .with_context(|| format!("Failed to update program {}", args.id))?;

    print_record(&updated, args.json)
}
