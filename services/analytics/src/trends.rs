//! Per province/procedure linear trends

use crate::model::{round_to, WaitTimeRecord};
use crate::stats;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendCategory {
    Increasing,
    #[serde(rename = "Slightly Increasing")]
    SlightlyIncreasing,
    Stable,
    #[serde(rename = "Slightly Decreasing")]
    SlightlyDecreasing,
    Decreasing,
}

impl TrendCategory {
    /// Flat or noisy series are stable; otherwise the sign of the slope decides and
    /// R² above 0.5 drops the "slightly".
    pub fn classify(slope: f64, r_squared: f64) -> Self {
        if slope.abs() < 0.5 && r_squared < 0.3 {
            TrendCategory::Stable
        } else if slope > 0.0 {
            if r_squared > 0.5 {
                TrendCategory::Increasing
            } else {
                TrendCategory::SlightlyIncreasing
            }
        } else if r_squared > 0.5 {
            TrendCategory::Decreasing
        } else {
            TrendCategory::SlightlyDecreasing
        }
    }

    pub fn is_worsening(&self) -> bool {
        matches!(self, TrendCategory::Increasing | TrendCategory::SlightlyIncreasing)
    }

    pub fn is_improving(&self) -> bool {
        matches!(self, TrendCategory::Decreasing | TrendCategory::SlightlyDecreasing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendResult {
    pub province: String,
    pub procedure: String,
    pub years_of_data: usize,
    /// Days per year
    pub slope: f64,
    pub r_squared: f64,
    /// None when the first value is 0
    pub percent_change: Option<f64>,
    pub trend_category: TrendCategory,
    pub first_year_wait: f64,
    pub last_year_wait: f64,
    pub average_wait: f64,
    /// Population standard deviation of the series
    pub volatility: f64,
}

/// `"{province}_{procedure}"`
pub fn trend_key(province: &str, procedure: &str) -> String {
    format!("{}_{}", province, procedure)
}

/// Fit every province/procedure series with at least `min_points` values.
/// Shorter series and series spanning a single year are left out.
pub fn analyze(records: &[WaitTimeRecord], min_points: usize) -> BTreeMap<String, TrendResult> {
    let mut series: BTreeMap<(&str, &str), Vec<(i32, f64)>> = BTreeMap::new();
    for record in records {
        series
            .entry((record.province.as_str(), record.procedure.as_str()))
            .or_default()
            .push((record.year, record.value));
    }

    let mut trends = BTreeMap::new();
    for ((province, procedure), mut points) in series {
        if points.len() < min_points {
            continue;
        }
        points.sort_by_key(|(year, _)| *year);
        let years: Vec<f64> = points.iter().map(|(y, _)| f64::from(*y)).collect();
        let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

        let Some(fit) = stats::linear_fit(&years, &values) else {
            continue;
        };
        let first = values[0];
        let last = values[values.len() - 1];
        let percent_change = if first == 0.0 {
            None
        } else {
            Some(round_to((last - first) / first * 100.0, 2))
        };

        trends.insert(
            trend_key(province, procedure),
            TrendResult {
                province: province.to_string(),
                procedure: procedure.to_string(),
                years_of_data: values.len(),
                slope: round_to(fit.slope, 3),
                r_squared: round_to(fit.r_squared, 3),
                percent_change,
                trend_category: TrendCategory::classify(fit.slope, fit.r_squared),
                first_year_wait: first,
                last_year_wait: last,
                average_wait: round_to(stats::mean(&values), 1),
                volatility: round_to(stats::population_std_dev(&values), 1),
            },
        );
    }
    trends
}

/// Longest province/procedure series in `records`
pub(crate) fn longest_series(records: &[WaitTimeRecord]) -> usize {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for record in records {
        *counts
            .entry((record.province.as_str(), record.procedure.as_str()))
            .or_default() += 1;
    }
    counts.into_values().max().unwrap_or(0)
}
