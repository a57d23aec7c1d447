//! Cleaning and normalization of extracted rows
//!
//! Steps run in a fixed order and each one is idempotent:
//! 1. drop empty rows
//! 2. drop repeated header rows
//! 3. trim province / procedure names, drop rows missing either
//! 4. canonicalize metric spellings
//! 5. coerce the year, drop rows outside the valid range
//! 6. coerce the result, sentinels become missing
//! 7. derive the quality flag

use crate::extract::{Cell, RawRow, RawTable};
use common::config::{ReferenceData, RuleSettings, Settings, SourceSettings};
use common::QualityFlag;
use serde::Serialize;
use tracing::{debug, info};

/// A typed, normalized source row
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub reporting_level: Option<String>,
    pub province: String,
    pub region: Option<String>,
    pub procedure: String,
    pub metric: Option<String>,
    pub year: i32,
    pub unit: Option<String>,
    pub result: Option<f64>,
    pub quality_flag: QualityFlag,
}

/// Row counts per cleaning outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningStats {
    pub original_rows: usize,
    pub empty_rows: usize,
    pub header_artifacts: usize,
    pub missing_names: usize,
    pub unparseable_years: usize,
    pub out_of_range_years: usize,
    pub canonicalized_metrics: usize,
    pub unparseable_results: usize,
    pub clean_rows: usize,
    pub missing_results: usize,
    pub invalid_results: usize,
}

impl CleaningStats {
    pub fn dropped_rows(&self) -> usize {
        self.original_rows - self.clean_rows
    }
}

#[derive(Debug, Clone)]
pub struct CleanedData {
    pub records: Vec<CleanRecord>,
    pub stats: CleaningStats,
}

pub struct Cleaner<'a> {
    source: &'a SourceSettings,
    rules: &'a RuleSettings,
    reference: &'a ReferenceData,
}

impl<'a> Cleaner<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            source: &settings.source,
            rules: &settings.rules,
            reference: &settings.reference,
        }
    }

    pub fn clean(&self, table: &RawTable) -> CleanedData {
        let mut stats = CleaningStats {
            original_rows: table.len(),
            ..CleaningStats::default()
        };

        let records: Vec<CleanRecord> = table
            .rows
            .iter()
            .filter_map(|row| self.clean_row(row, &mut stats))
            .collect();

        stats.clean_rows = records.len();
        stats.missing_results = records
            .iter()
            .filter(|r| r.quality_flag == QualityFlag::Missing)
            .count();
        stats.invalid_results = records
            .iter()
            .filter(|r| r.quality_flag == QualityFlag::Invalid)
            .count();

        info!(
            original = stats.original_rows,
            clean = stats.clean_rows,
            missing = stats.missing_results,
            invalid = stats.invalid_results,
            "cleaning complete"
        );
        debug!(?stats, "cleaning breakdown");

        CleanedData { records, stats }
    }

    fn clean_row(&self, row: &RawRow, stats: &mut CleaningStats) -> Option<CleanRecord> {
        if row.is_empty() {
            stats.empty_rows += 1;
            return None;
        }

        if self.is_header_artifact(row) {
            stats.header_artifacts += 1;
            return None;
        }

        let (province, procedure) = match (row.province.text(), row.indicator.text()) {
            (Some(p), Some(i)) => (p, i),
            _ => {
                stats.missing_names += 1;
                return None;
            }
        };

        let metric = row.metric.text().map(|label| {
            let canonical = self.reference.canonical_metric(&label);
            if canonical != label {
                stats.canonicalized_metrics += 1;
            }
            canonical.to_string()
        });

        let year = match coerce_year(&row.year) {
            Some(year) => year,
            None => {
                stats.unparseable_years += 1;
                return None;
            }
        };
        if !self.rules.year_in_range(year) {
            stats.out_of_range_years += 1;
            return None;
        }

        let result = match self.coerce_result(&row.result) {
            ResultValue::Number(v) => Some(v),
            ResultValue::Missing => None,
            ResultValue::Unparseable => {
                stats.unparseable_results += 1;
                None
            }
        };

        Some(CleanRecord {
            reporting_level: row.reporting_level.text(),
            province,
            region: row.region.text(),
            procedure,
            metric,
            year,
            unit: row.unit.text(),
            result,
            quality_flag: QualityFlag::for_result(result),
        })
    }

    fn is_header_artifact(&self, row: &RawRow) -> bool {
        let matches = |cell: &Cell, label: &str| cell.text().as_deref() == Some(label);
        matches(&row.province, &self.source.province_header_label)
            || matches(&row.indicator, &self.source.indicator_header_label)
    }

    fn coerce_result(&self, cell: &Cell) -> ResultValue {
        match cell {
            Cell::Empty => ResultValue::Missing,
            Cell::Number(v) if v.is_finite() => ResultValue::Number(*v),
            Cell::Number(_) => ResultValue::Unparseable,
            Cell::Text(text) if self.source.is_missing_sentinel(text) => ResultValue::Missing,
            Cell::Text(text) => match text.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => ResultValue::Number(v),
                _ => ResultValue::Unparseable,
            },
        }
    }
}

enum ResultValue {
    Number(f64),
    Missing,
    Unparseable,
}

/// Whole-number year from a numeric cell or numeric text.
pub fn coerce_year(cell: &Cell) -> Option<i32> {
    let value = match cell {
        Cell::Number(v) => *v,
        Cell::Text(text) => text.trim().parse::<f64>().ok()?,
        Cell::Empty => return None,
    };
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}
