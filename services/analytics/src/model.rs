//! Query and result types shared by every analysis

use common::config::{AnalyticsSettings, NATIONAL_AGGREGATE};
use serde::Serialize;

/// Filter for [`crate::FactSource::wait_times`]. Also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WaitTimeQuery {
    /// Case-insensitive substring of the province name
    pub province: Option<String>,
    /// Case-insensitive substring of the procedure name
    pub procedure: Option<String>,
    pub start_year: i32,
    pub end_year: i32,
    /// Exact metric name, e.g. "50th Percentile"
    pub metric: String,
}

impl WaitTimeQuery {
    pub fn new(metric: &str, start_year: i32, end_year: i32) -> Self {
        Self {
            province: None,
            procedure: None,
            start_year,
            end_year,
            metric: metric.to_string(),
        }
    }

    /// Default metric over the default year span
    pub fn from_settings(settings: &AnalyticsSettings) -> Self {
        Self::new(
            &settings.default_metric,
            settings.default_start_year,
            settings.default_year,
        )
    }

    pub fn province(mut self, province: Option<&str>) -> Self {
        self.province = province.map(str::to_string);
        self
    }

    pub fn procedure(mut self, procedure: Option<&str>) -> Self {
        self.procedure = procedure.map(str::to_string);
        self
    }

    /// Row-level version of the warehouse query, used by in-memory sources.
    pub fn matches(&self, record: &WaitTimeRecord) -> bool {
        (self.start_year..=self.end_year).contains(&record.year)
            && record.metric == self.metric
            && record.province != NATIONAL_AGGREGATE
            && contains_ignore_case(&record.province, self.province.as_deref())
            && contains_ignore_case(&record.procedure, self.procedure.as_deref())
    }
}

fn contains_ignore_case(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

/// One non-null result joined to its dimension names
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WaitTimeRecord {
    pub province: String,
    pub procedure: String,
    pub procedure_category: Option<String>,
    pub metric: String,
    pub year: i32,
    pub value: f64,
    pub unit: Option<String>,
    pub region: Option<String>,
}

impl WaitTimeRecord {
    pub fn new(province: &str, procedure: &str, metric: &str, year: i32, value: f64) -> Self {
        Self {
            province: province.to_string(),
            procedure: procedure.to_string(),
            procedure_category: None,
            metric: metric.to_string(),
            year,
            value,
            unit: None,
            region: None,
        }
    }
}

/// Outcome of an analysis that needs a minimum amount of data
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Analysis<T> {
    Ready(T),
    InsufficientData {
        required: usize,
        available: usize,
        context: String,
    },
}

impl<T> Analysis<T> {
    pub fn insufficient(required: usize, available: usize, context: impl Into<String>) -> Self {
        Analysis::InsufficientData {
            required,
            available,
            context: context.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Analysis::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Analysis::Ready(value) => Some(value),
            Analysis::InsufficientData { .. } => None,
        }
    }

    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Analysis::Ready(value) => Some(value),
            Analysis::InsufficientData { .. } => None,
        }
    }
}

/// Keep rows whose name equals `wanted` (ignoring case); failing that, the rows of
/// the first name in sort order. Substring filters can match several names.
pub fn narrow_to_one<'a, F>(rows: &'a [WaitTimeRecord], wanted: &str, field: F) -> Vec<&'a WaitTimeRecord>
where
    F: Fn(&WaitTimeRecord) -> &str,
{
    let exact: Vec<&WaitTimeRecord> = rows
        .iter()
        .filter(|r| field(r).eq_ignore_ascii_case(wanted))
        .collect();
    if !exact.is_empty() {
        return exact;
    }
    let Some(first) = rows.iter().map(|r| field(r)).min() else {
        return Vec::new();
    };
    rows.iter().filter(|r| field(r) == first).collect()
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
