//! End-to-end load: extract, clean, validate, dimensions, facts, audit

use crate::audit::{finish_load_audit, start_load_audit, LoadOutcome};
use crate::dimensions::{self, DimensionCounts};
use crate::error::PipelineError;
use crate::extract::{self, RawTable};
use crate::facts::{self, FactLoadStats};
use crate::transform::{CleanedData, Cleaner, CleaningStats};
use crate::validate::Validator;
use common::{LoadStatus, Settings};
use serde::Serialize;
use sqlx::PgPool;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Overrides `settings.source.path`
    pub source: Option<PathBuf>,
}

/// Source data after the read-only stages
#[derive(Debug, Clone)]
pub struct PreparedLoad {
    pub raw: RawTable,
    pub cleaned: CleanedData,
    pub issues: Vec<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub load_id: Option<Uuid>,
    pub source_file: String,
    pub fingerprint: String,
    pub dry_run: bool,
    pub cleaning: CleaningStats,
    pub validation_issues: Vec<String>,
    pub dimensions: Option<DimensionCounts>,
    pub facts: Option<FactLoadStats>,
    /// Inserted facts with a result, as a percentage
    pub completeness_pct: Option<f64>,
    pub completeness_below_minimum: bool,
    pub duration: Duration,
}

/// Extract, clean and validate. Touches no database.
pub fn prepare(settings: &Settings, options: &PipelineOptions) -> Result<PreparedLoad, PipelineError> {
    let path = options
        .source
        .clone()
        .unwrap_or_else(|| settings.source.path.clone());

    let raw = extract::extract_from(&path, &settings.source)?;
    let cleaned = Cleaner::new(settings).clean(&raw);
    let issues = Validator::new(settings).validate(&cleaned.records);

    let source_file = settings.source.source_file_label(&path);

    Ok(PreparedLoad {
        raw,
        cleaned,
        issues,
        source_file,
    })
}

/// Read-only rehearsal of a load.
pub fn dry_run(settings: &Settings, options: &PipelineOptions) -> Result<LoadSummary, PipelineError> {
    let started = Instant::now();
    let prepared = prepare(settings, options)?;
    info!(rows = prepared.cleaned.records.len(), "dry run: stopping before database writes");

    Ok(LoadSummary {
        load_id: None,
        source_file: prepared.source_file,
        fingerprint: prepared.raw.fingerprint,
        dry_run: true,
        cleaning: prepared.cleaned.stats,
        validation_issues: prepared.issues,
        dimensions: None,
        facts: None,
        completeness_pct: None,
        completeness_below_minimum: false,
        duration: started.elapsed(),
    })
}

/// Run the full load. Reruns on the same source leave identical table contents.
pub async fn run_pipeline(
    pool: &PgPool,
    settings: &Settings,
    options: &PipelineOptions,
) -> Result<LoadSummary, PipelineError> {
    let started = Instant::now();
    info!("starting wait-times load");

    // Extraction failures return here, before any write.
    let prepared = prepare(settings, options)?;
    let load_id = start_load_audit(pool, &prepared.source_file).await?;
    info!(%load_id, source = %prepared.source_file, "load audit started");

    let loaded = load(pool, settings, &prepared).await;
    let processed = prepared.cleaned.records.len();

    match loaded {
        Ok((dimensions, facts)) => {
            let outcome = LoadOutcome {
                status: LoadStatus::Completed,
                processed,
                inserted: facts.inserted,
                failed: facts.failed,
                error: None,
                duration_seconds: started.elapsed().as_secs_f64(),
            };
            finish_load_audit(pool, load_id, &outcome).await?;

            let completeness = facts.completeness();
            let below = completeness < settings.rules.min_completeness;
            if below {
                warn!(
                    completeness = %format!("{:.1}%", completeness * 100.0),
                    minimum = %format!("{:.1}%", settings.rules.min_completeness * 100.0),
                    "data completeness below minimum"
                );
            }
            info!(%load_id, "load completed");

            Ok(LoadSummary {
                load_id: Some(load_id),
                source_file: prepared.source_file,
                fingerprint: prepared.raw.fingerprint,
                dry_run: false,
                cleaning: prepared.cleaned.stats,
                validation_issues: prepared.issues,
                dimensions: Some(dimensions),
                facts: Some(facts),
                completeness_pct: Some(completeness * 100.0),
                completeness_below_minimum: below,
                duration: started.elapsed(),
            })
        }
        Err(e) => {
            error!(%load_id, error = %e, "load failed");
            let outcome = LoadOutcome {
                status: LoadStatus::Failed,
                processed,
                inserted: 0,
                failed: processed,
                error: Some(e.to_string()),
                duration_seconds: started.elapsed().as_secs_f64(),
            };
            if let Err(audit_err) = finish_load_audit(pool, load_id, &outcome).await {
                error!(%load_id, error = %audit_err, "could not mark load as failed");
            }
            Err(e)
        }
    }
}

async fn load(
    pool: &PgPool,
    settings: &Settings,
    prepared: &PreparedLoad,
) -> Result<(DimensionCounts, FactLoadStats), PipelineError> {
    let records = &prepared.cleaned.records;
    let dimensions = dimensions::load_dimensions(pool, records, &settings.reference).await?;
    let facts = facts::load_facts(
        pool,
        records,
        &settings.reference,
        &prepared.source_file,
        settings.rules.batch_size,
    )
    .await?;
    Ok((dimensions, facts))
}

impl LoadSummary {
    /// Human-readable summary for the terminal
    pub fn render(&self) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "{}",
            if self.dry_run { "DRY RUN SUMMARY" } else { "DATA LOAD SUMMARY" }
        );
        let _ = writeln!(out, "{}", rule);
        if let Some(id) = self.load_id {
            let _ = writeln!(out, "Load id:              {}", id);
        }
        let _ = writeln!(out, "Source:               {}", self.source_file);
        let _ = writeln!(out, "Fingerprint:          {}", self.fingerprint);
        let _ = writeln!(out, "Rows read:            {}", self.cleaning.original_rows);
        let _ = writeln!(out, "Rows after cleaning:  {}", self.cleaning.clean_rows);
        let _ = writeln!(out, "Missing results:      {}", self.cleaning.missing_results);
        let _ = writeln!(out, "Invalid results:      {}", self.cleaning.invalid_results);

        if let Some(d) = &self.dimensions {
            let _ = writeln!(out, "Provinces loaded:     {}", d.provinces);
            let _ = writeln!(out, "Procedures loaded:    {}", d.procedures);
            let _ = writeln!(out, "Metrics loaded:       {}", d.metrics);
            let _ = writeln!(out, "Time periods loaded:  {}", d.time_periods);
        }
        if let Some(f) = &self.facts {
            let _ = writeln!(out, "Fact records loaded:  {}", f.inserted);
            let _ = writeln!(out, "Unresolved rows:      {}", f.failed);
        }
        if let Some(pct) = self.completeness_pct {
            let marker = if self.completeness_below_minimum { " (below minimum)" } else { "" };
            let _ = writeln!(out, "Data completeness:    {:.1}%{}", pct, marker);
        }
        let _ = writeln!(out, "Duration:             {:.2}s", self.duration.as_secs_f64());

        if self.validation_issues.is_empty() {
            let _ = writeln!(out, "Validation issues:    none");
        } else {
            let _ = writeln!(out, "Validation issues:    {}", self.validation_issues.len());
            for issue in &self.validation_issues {
                let _ = writeln!(out, "  - {}", issue);
            }
        }
        let _ = write!(out, "{}", rule);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use std::io::Write;

    const HEADER: &str = "Reporting level,Province/territory,Region,Indicator,Metric,Data year,Unit of measurement,Indicator result";

    fn csv_settings(body: &str) -> (tempfile::NamedTempFile, Settings) {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "{}\n{}", HEADER, body).unwrap();
        let mut settings = Settings::default();
        settings.source.path = file.path().to_path_buf();
        settings.source.header_row = 0;
        (file, settings)
    }

    #[test]
    fn test_dry_run_summarizes_without_database() {
        let (_file, settings) = csv_settings(
            "Provincial,Ontario,,CABG,50th Percentile,2019,Days,12\n\
             Provincial,Ontario,,CABG,90th percentile,2019,Days,9\n\
             Provincial,Ontario,,CABG,Volume,2030,Cases,100\n\
             Provincial,Quebec,,CABG,Volume,2019,Cases,n/a\n",
        );

        let summary = dry_run(&settings, &PipelineOptions::default()).unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.load_id, None);
        assert_eq!(summary.cleaning.original_rows, 4);
        assert_eq!(summary.cleaning.clean_rows, 3);
        assert_eq!(summary.cleaning.missing_results, 1);
        assert_eq!(summary.validation_issues.len(), 1);
        assert!(summary.validation_issues[0].contains("90th percentile below 50th"));

        let text = summary.render();
        assert!(text.contains("DRY RUN SUMMARY"));
        assert!(text.contains("Rows after cleaning:  3"));
    }

    #[test]
    fn test_source_override_and_label() {
        let (file, mut settings) = csv_settings("Provincial,Ontario,,CABG,Volume,2019,Cases,5\n");
        settings.source.path = PathBuf::from("/does/not/exist.xlsx");

        let options = PipelineOptions {
            source: Some(file.path().to_path_buf()),
        };
        let prepared = prepare(&settings, &options).unwrap();
        assert!(prepared.source_file.ends_with(".csv"));

        settings.source.source_file = Some("cihi-2024".to_string());
        let prepared = prepare(&settings, &options).unwrap();
        assert_eq!(prepared.source_file, "cihi-2024");
    }

    #[test]
    fn test_missing_source_is_extraction_error() {
        let mut settings = Settings::default();
        settings.source.path = PathBuf::from("/does/not/exist.xlsx");
        let err = dry_run(&settings, &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::NotFound(_))));
    }
}
