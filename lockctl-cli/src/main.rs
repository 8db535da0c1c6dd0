//! lockctl CLI - versioned record updates under optimistic or pessimistic locking
//!
//! Subcommands:
//! - `init`: create the `programs` table
//! - `create` / `show`: insert and inspect records
//! - `update`: apply one guarded update with a chosen strategy
//! - `race`: run N concurrent writers against one record and report outcomes

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod tracing_setup;

use commands::{CommandContext, CreateArgs, RaceArgs, ShowArgs, UpdateArgs};
use config::LockctlConfig;
use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "lockctl",
    author,
    version,
    about = "Update versioned records without lost updates",
    long_about = "Apply record updates under optimistic (version check) or pessimistic \
                  (SELECT ... FOR UPDATE) concurrency control against PostgreSQL."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Config file (default: ~/.lockctl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the programs table if it does not exist
    Init,
    /// Insert a new record at version 0
    Create(CreateArgs),
    /// Print a record
    Show(ShowArgs),
    /// Update a record using a locking strategy
    Update(UpdateArgs),
    /// Race concurrent writers against one record
    Race(RaceArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing so DATABASE_URL from .env reaches clap
    let dotenv = config::load_dotenv();
    let cli = Cli::parse();

    tracing_setup::init(&TracingConfig { debug: cli.debug }).ok();
    dotenv.log();

    let config = LockctlConfig::load(cli.config.as_deref())?;
    let ctx = CommandContext::new(config, cli.database_url.as_deref());

    match cli.command {
        Commands::Init => commands::run_init(&ctx).await?,
        Commands::Create(args) => commands::run_create(&ctx, args).await?,
        Commands::Show(args) => commands::run_show(&ctx, args).await?,
        Commands::Update(args) => commands::run_update(&ctx, args).await?,
        Commands::Race(args) => commands::run_race(&ctx, args).await?,
    }
    Ok(())
}
