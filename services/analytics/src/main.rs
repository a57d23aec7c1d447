//! Analytics Service - Answers wait-time questions from the warehouse
//!
//! Responsibilities:
//! - Trend analysis per province and procedure
//! - Benchmark compliance, provincial comparison and rule-based insights
//! - Significance tests between provinces and over time
//!
//! Usage:
//!   cargo run --bin analytics -- trends --province Ontario
//!   cargo run --bin analytics -- benchmark --year 2023
//!   cargo run --bin analytics -- compare --procedure "Hip Replacement"
//!   cargo run --bin analytics -- significance Ontario Quebec --procedure "MRI Scan"

use analytics::{PgFactSource, WaitTimeAnalyzer, WaitTimeQuery};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{logging, Settings};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "analytics", about = "Wait-time analytics over the warehouse")]
struct Args {
    /// JSON settings file (overrides defaults, overridden by env vars)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Linear trend per province/procedure
    Trends {
        #[arg(long)]
        province: Option<String>,
        #[arg(long)]
        procedure: Option<String>,
        #[arg(long)]
        start_year: Option<i32>,
        #[arg(long)]
        end_year: Option<i32>,
        #[arg(long)]
        metric: Option<String>,
    },
    /// Compliance against benchmark targets
    Benchmark {
        #[arg(long)]
        province: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// One procedure across provinces
    Compare {
        #[arg(long)]
        procedure: String,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Findings, alerts and recommendations
    Insights {
        #[arg(long)]
        province: Option<String>,
        #[arg(long)]
        procedure: Option<String>,
    },
    /// Two-province hypothesis tests
    Significance {
        province1: String,
        province2: String,
        #[arg(long)]
        procedure: String,
        #[arg(long)]
        start_year: Option<i32>,
        #[arg(long)]
        end_year: Option<i32>,
    },
    /// Is one province's series trending?
    TrendTest {
        #[arg(long)]
        province: String,
        #[arg(long)]
        procedure: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", body);
    Ok(())
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

    let pool = common::db::connect(&settings.database)
        .await
        .context("Failed to connect to database")?;
    let mut analyzer = WaitTimeAnalyzer::new(PgFactSource::new(pool), &settings);
    analyzer
        .sync_dataset_version()
        .await
        .context("Failed to read dataset version")?;

    let defaults = &settings.analytics;
    match args.command {
        Command::Trends {
            province,
            procedure,
            start_year,
            end_year,
            metric,
        } => {
            let query = WaitTimeQuery::new(
                metric.as_deref().unwrap_or(&defaults.default_metric),
                start_year.unwrap_or(defaults.default_start_year),
                end_year.unwrap_or(defaults.default_year),
            )
            .province(province.as_deref())
            .procedure(procedure.as_deref());
            let rows = analyzer
                .get_wait_time_data(&query)
                .await
                .context("Failed to fetch wait times")?;
            print_json(&analyzer.calculate_trend_analysis(&rows))?;
        }
        Command::Benchmark { province, year } => {
            let result = analyzer
                .benchmark_analysis(province.as_deref(), year.unwrap_or(defaults.default_year))
                .await
                .context("Benchmark analysis failed")?;
            print_json(&result)?;
        }
        Command::Compare { procedure, year } => {
            let result = analyzer
                .provincial_comparison(&procedure, year.unwrap_or(defaults.default_year))
                .await
                .context("Provincial comparison failed")?;
            print_json(&result)?;
        }
        Command::Insights {
            province,
            procedure,
        } => {
            let result = analyzer
                .generate_insights(province.as_deref(), procedure.as_deref())
                .await
                .context("Insight generation failed")?;
            print_json(&result)?;
        }
        Command::Significance {
            province1,
            province2,
            procedure,
            start_year,
            end_year,
        } => {
            let years = Some((
                start_year.unwrap_or(defaults.default_start_year),
                end_year.unwrap_or(defaults.default_year),
            ));
            let result = analyzer
                .compare_provinces(&province1, &province2, &procedure, years)
                .await
                .context("Province comparison test failed")?;
            print_json(&result)?;
        }
        Command::TrendTest {
            province,
            procedure,
        } => {
            let result = analyzer
                .trend_significance(&province, &procedure)
                .await
                .context("Trend significance test failed")?;
            print_json(&result)?;
        }
    }

    Ok(())
}
