//! Quality Service - Audits the loaded wait-times warehouse
//!
//! Responsibilities:
//! - Snapshot the warehouse tables (read-only)
//! - Run the quality battery; a failing check never stops the others
//! - Print a summary and export the JSON report
//!
//! Usage:
//!   cargo run --bin quality
//!   cargo run --bin quality -- --output reports/latest.json
//!   cargo run --bin quality -- --no-export
//!   cargo run --bin quality -- --quick

use anyhow::{Context, Result};
use clap::Parser;
use common::{logging, Settings};
use quality::report::database_label;
use quality::{quick_validation, run_checks, Snapshot};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quality", about = "Runs data quality checks against the warehouse")]
struct Args {
    /// JSON settings file (overrides defaults, overridden by env vars)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Report path; defaults to a timestamped file in the reports directory
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the summary only
    #[arg(long, default_value = "false")]
    no_export: bool,

    /// Schema, integrity and completeness only; exits non-zero on failure
    #[arg(long, default_value = "false")]
    quick: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init("info");
    let args = Args::parse();

    let settings = Settings::load(args.settings.as_deref()).context("Failed to load settings")?;
    settings
        .ensure_valid(true)
        .context("Refusing to start with invalid configuration")?;

    println!("=== Wait Times Data Quality ===");
    let pool = common::db::connect(&settings.database)
        .await
        .context("Failed to connect to database")?;

    let snapshot = Snapshot::load(&pool)
        .await
        .context("Failed to read warehouse tables")?;

    if args.quick {
        if !quick_validation(&snapshot, &settings) {
            anyhow::bail!("Quick validation failed");
        }
        println!("Quick validation: PASSED");
        return Ok(());
    }

    let report = run_checks(&snapshot, &settings, &database_label(&settings.database.url));

    println!("{}", report.render());

    if !args.no_export {
        let path = args
            .output
            .unwrap_or_else(|| report.default_path(&settings.reports.dir));
        let written = report.export(&path).context("Failed to export quality report")?;
        println!("Report: {}", written.display());
    }

    Ok(())
}
