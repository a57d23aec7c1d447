//! Vocabulary shared by the loader, the quality checker and the analytics engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Warehouse table names
pub mod tables {
    pub const PROVINCES: &str = "dim_provinces";
    pub const PROCEDURES: &str = "dim_procedures";
    pub const METRICS: &str = "dim_metrics";
    pub const TIME_PERIODS: &str = "dim_time_periods";
    pub const FACTS: &str = "fact_wait_times";
    pub const LOAD_AUDIT: &str = "audit_data_loads";

    pub const ALL: [&str; 6] = [PROVINCES, PROCEDURES, METRICS, TIME_PERIODS, FACTS, LOAD_AUDIT];
}

/// Per-fact data quality flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    Valid,
    Missing,
    Invalid,
    Estimated,
    Suppressed,
}

impl QualityFlag {
    pub const ALL: [QualityFlag; 5] = [
        QualityFlag::Valid,
        QualityFlag::Missing,
        QualityFlag::Invalid,
        QualityFlag::Estimated,
        QualityFlag::Suppressed,
    ];

    /// MISSING when there is no result, INVALID when it is negative, VALID otherwise.
    pub fn for_result(result: Option<f64>) -> Self {
        match result {
            None => QualityFlag::Missing,
            Some(v) if v < 0.0 => QualityFlag::Invalid,
            Some(_) => QualityFlag::Valid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Valid => "VALID",
            QualityFlag::Missing => "MISSING",
            QualityFlag::Invalid => "INVALID",
            QualityFlag::Estimated => "ESTIMATED",
            QualityFlag::Suppressed => "SUPPRESSED",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QualityFlag::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown data quality flag '{}'", s))
    }
}

/// Kind of measurement a metric row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    Percentile,
    #[serde(rename = "Benchmark_Compliance")]
    BenchmarkCompliance,
    Volume,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Percentile => "Percentile",
            MetricType::BenchmarkCompliance => "Benchmark_Compliance",
            MetricType::Volume => "Volume",
        }
    }

    /// Best-effort classification of a metric label that is not in the reference table.
    pub fn infer(label: &str) -> Option<Self> {
        let lower = label.to_lowercase();
        if lower.contains("percentile") {
            Some(MetricType::Percentile)
        } else if lower.contains("benchmark") {
            Some(MetricType::BenchmarkCompliance)
        } else if lower.contains("volume") {
            Some(MetricType::Volume)
        } else {
            None
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one `audit_data_loads` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    InProgress,
    Completed,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::InProgress => "in_progress",
            LoadStatus::Completed => "completed",
            LoadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static province metadata, keyed by province name in the reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvinceInfo {
    pub code: String,
    pub region: String,
    pub population: Option<i64>,
    pub is_territory: bool,
}

impl ProvinceInfo {
    pub fn new(code: &str, region: &str, population: i64, is_territory: bool) -> Self {
        Self {
            code: code.to_string(),
            region: region.to_string(),
            population: Some(population),
            is_territory,
        }
    }

    /// Record used for names missing from the reference table.
    pub fn unknown() -> Self {
        Self {
            code: "UNK".to_string(),
            region: "Unknown".to_string(),
            population: None,
            is_territory: false,
        }
    }
}

/// Static procedure metadata, keyed by procedure name in the reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureInfo {
    pub code: String,
    pub category: String,
    pub priority: String,
}

impl ProcedureInfo {
    pub fn new(code: &str, category: &str, priority: &str) -> Self {
        Self {
            code: code.to_string(),
            category: category.to_string(),
            priority: priority.to_string(),
        }
    }

    /// Fallback for procedures missing from the reference table.
    pub fn generated(name: &str) -> Self {
        Self {
            code: generated_procedure_code(name),
            category: "Other".to_string(),
            priority: "Medium".to_string(),
        }
    }
}

/// Uppercase, replace every character outside `[A-Z0-9]` with `_`, keep 10 characters.
pub fn generated_procedure_code(name: &str) -> String {
    name.trim()
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_uppercase() || c.is_ascii_digit() { c } else { '_' })
        .take(10)
        .collect()
}

/// One row of the fixed metric dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub code: String,
    pub name: String,
    pub metric_type: MetricType,
    pub unit: String,
    pub higher_is_better: Option<bool>,
}

impl MetricDefinition {
    pub fn new(
        code: &str,
        name: &str,
        metric_type: MetricType,
        unit: &str,
        higher_is_better: Option<bool>,
    ) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            metric_type,
            unit: unit.to_string(),
            higher_is_better,
        }
    }
}
