//! ETL Service - Loads the wait-times spreadsheet into the star schema
//!
//! Responsibilities:
//! - Extract the configured worksheet (or CSV export)
//! - Clean and validate rows (validation is advisory)
//! - Replace dimension tables and the fact table
//! - Record the run in audit_data_loads
//!
//! Reruns are idempotent: every load replaces dimensions and facts wholesale.

use anyhow::{Context, Result};
use clap::Parser;
use common::{logging, Settings};
use etl::{dry_run, run_pipeline, PipelineOptions};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Loads wait-time statistics into the warehouse")]
struct Args {
    /// JSON settings file (overrides defaults, overridden by env vars)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Source spreadsheet; defaults to SOURCE_FILE / settings
    #[arg(long)]
    source: Option<PathBuf>,

    /// Extract, clean and validate only - don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init("info");
    let args = Args::parse();

    let settings = Settings::load(args.settings.as_deref()).context("Failed to load settings")?;
    settings
        .ensure_valid(!args.dry_run)
        .context("Refusing to start with invalid configuration")?;

    let options = PipelineOptions {
        source: args.source,
    };

    println!("=== Wait Times ETL ===");

    let summary = if args.dry_run {
        println!("Mode: dry run (no database writes)");
        dry_run(&settings, &options).context("Dry run failed")?
    } else {
        println!("Connecting to database...");
        let pool = common::db::connect(&settings.database)
            .await
            .context("Failed to connect to database")?;
        println!("Connected.");
        run_pipeline(&pool, &settings, &options)
            .await
            .context("ETL pipeline failed")?
    };

    println!("{}", summary.render());
    Ok(())
}
