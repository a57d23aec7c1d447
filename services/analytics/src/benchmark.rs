//! Median waits scored against national benchmark targets

use crate::model::{round_to, Analysis, WaitTimeRecord};
use crate::stats;
use common::config::ReferenceData;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// 100 at or under the target, otherwise `100 * target / median` floored at 0.
pub fn compliance_score(median_wait: f64, target: f64) -> f64 {
    if median_wait <= target {
        100.0
    } else {
        (100.0 * target / median_wait).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComplianceCategory {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ComplianceCategory {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            ComplianceCategory::Excellent
        } else if score >= 75.0 {
            ComplianceCategory::Good
        } else if score >= 50.0 {
            ComplianceCategory::Fair
        } else {
            ComplianceCategory::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRow {
    pub province: String,
    pub procedure: String,
    pub procedure_category: Option<String>,
    pub target_days: f64,
    pub compliance: f64,
    pub median_wait: f64,
    pub p90_wait: Option<f64>,
    pub volume: Option<f64>,
    pub category: ComplianceCategory,
    /// Days above target, 0 when compliant
    pub improvement_needed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub total_procedures: usize,
    pub avg_compliance: f64,
    pub procedures_above_90pct: usize,
    pub procedures_below_50pct: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub avg_compliance: f64,
    pub avg_median_wait: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureStats {
    pub avg_compliance: f64,
    pub avg_median_wait: f64,
    pub total_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub year: i32,
    pub province: Option<String>,
    pub summary: BenchmarkSummary,
    pub compliance_distribution: ComplianceDistribution,
    pub by_procedure: Vec<BenchmarkRow>,
    /// Keyed by procedure category ("Uncategorized" when unknown)
    pub by_category: BTreeMap<String, CategoryStats>,
    /// Keyed by procedure name, across provinces
    pub procedure_summary: BTreeMap<String, ProcedureStats>,
}

type RowKey<'a> = (&'a str, &'a str, i32);

fn index(rows: &[WaitTimeRecord]) -> HashMap<RowKey<'_>, f64> {
    rows.iter()
        .map(|r| ((r.province.as_str(), r.procedure.as_str(), r.year), r.value))
        .collect()
}

/// Score every median row whose procedure has a target. 90th percentile and
/// volume rows are matched on province, procedure and year.
pub fn build(
    medians: &[WaitTimeRecord],
    p90: &[WaitTimeRecord],
    volumes: &[WaitTimeRecord],
    reference: &ReferenceData,
    province: Option<&str>,
    year: i32,
) -> Analysis<BenchmarkReport> {
    if medians.is_empty() {
        return Analysis::insufficient(1, 0, format!("benchmark analysis for {}", year));
    }
    let p90 = index(p90);
    let volumes = index(volumes);

    let rows: Vec<BenchmarkRow> = medians
        .iter()
        .filter_map(|r| {
            let target = reference.benchmark_target(&r.procedure)?;
            let key = (r.province.as_str(), r.procedure.as_str(), r.year);
            let compliance = compliance_score(r.value, target);
            let category = r
                .procedure_category
                .clone()
                .or_else(|| reference.procedures.get(&r.procedure).map(|p| p.category.clone()));
            Some(BenchmarkRow {
                province: r.province.clone(),
                procedure: r.procedure.clone(),
                procedure_category: category,
                target_days: target,
                compliance: round_to(compliance, 1),
                median_wait: r.value,
                p90_wait: p90.get(&key).copied(),
                volume: volumes.get(&key).copied(),
                category: ComplianceCategory::from_score(compliance),
                improvement_needed: round_to((r.value - target).max(0.0), 1),
            })
        })
        .collect();

    if rows.is_empty() {
        return Analysis::insufficient(1, 0, format!("procedures with benchmark targets in {}", year));
    }

    let scores: Vec<f64> = rows.iter().map(|r| r.compliance).collect();
    let summary = BenchmarkSummary {
        total_procedures: rows.len(),
        avg_compliance: round_to(stats::mean(&scores), 1),
        procedures_above_90pct: scores.iter().filter(|s| **s >= 90.0).count(),
        procedures_below_50pct: scores.iter().filter(|s| **s < 50.0).count(),
    };

    let mut distribution = ComplianceDistribution::default();
    for row in &rows {
        match row.category {
            ComplianceCategory::Excellent => distribution.excellent += 1,
            ComplianceCategory::Good => distribution.good += 1,
            ComplianceCategory::Fair => distribution.fair += 1,
            ComplianceCategory::Poor => distribution.poor += 1,
        }
    }

    let mut categories: BTreeMap<String, Vec<&BenchmarkRow>> = BTreeMap::new();
    let mut procedures: BTreeMap<String, Vec<&BenchmarkRow>> = BTreeMap::new();
    for row in &rows {
        let category = row
            .procedure_category
            .clone()
            .unwrap_or_else(|| "Uncategorized".to_string());
        categories.entry(category).or_default().push(row);
        procedures.entry(row.procedure.clone()).or_default().push(row);
    }

    let by_category = categories
        .into_iter()
        .map(|(name, group)| {
            let stats = CategoryStats {
                count: group.len(),
                avg_compliance: avg(&group, |r| r.compliance),
                avg_median_wait: avg(&group, |r| r.median_wait),
            };
            (name, stats)
        })
        .collect();

    let procedure_summary = procedures
        .into_iter()
        .map(|(name, group)| {
            let stats = ProcedureStats {
                avg_compliance: avg(&group, |r| r.compliance),
                avg_median_wait: avg(&group, |r| r.median_wait),
                total_volume: group.iter().filter_map(|r| r.volume).sum(),
            };
            (name, stats)
        })
        .collect();

    Analysis::Ready(BenchmarkReport {
        year,
        province: province.map(str::to_string),
        summary,
        compliance_distribution: distribution,
        by_procedure: rows,
        by_category,
        procedure_summary,
    })
}

fn avg<F: Fn(&BenchmarkRow) -> f64>(rows: &[&BenchmarkRow], field: F) -> f64 {
    let values: Vec<f64> = rows.iter().map(|r| field(r)).collect();
    round_to(stats::mean(&values), 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn median(province: &str, procedure: &str, value: f64) -> WaitTimeRecord {
        WaitTimeRecord::new(province, procedure, "50th Percentile", 2023, value)
    }

    // -------------------------------------------------------------------------
    // Scoring
    // -------------------------------------------------------------------------

    #[test]
    fn test_compliance_at_and_above_target() {
        assert_eq!(compliance_score(182.0, 182.0), 100.0);
        assert_eq!(compliance_score(90.0, 182.0), 100.0);
        assert_eq!(compliance_score(364.0, 182.0), 50.0);
        assert_eq!(compliance_score(28.0 * 4.0, 28.0), 25.0);
    }

    #[test]
    fn test_category_thresholds() {
        assert_eq!(ComplianceCategory::from_score(90.0), ComplianceCategory::Excellent);
        assert_eq!(ComplianceCategory::from_score(89.9), ComplianceCategory::Good);
        assert_eq!(ComplianceCategory::from_score(75.0), ComplianceCategory::Good);
        assert_eq!(ComplianceCategory::from_score(50.0), ComplianceCategory::Fair);
        assert_eq!(ComplianceCategory::from_score(49.9), ComplianceCategory::Poor);
    }

    // -------------------------------------------------------------------------
    // Report
    // -------------------------------------------------------------------------

    #[test]
    fn test_report_aggregates() {
        let reference = ReferenceData::default();
        let medians = vec![
            median("Ontario", "Hip Replacement", 150.0),
            median("Quebec", "Hip Replacement", 364.0),
            median("Ontario", "CABG", 28.0),
            median("Ontario", "Unknown Procedure", 10.0),
        ];
        let p90 = vec![WaitTimeRecord::new("Ontario", "Hip Replacement", "90th Percentile", 2023, 300.0)];
        let volumes = vec![
            WaitTimeRecord::new("Ontario", "Hip Replacement", "Volume", 2023, 1200.0),
            WaitTimeRecord::new("Quebec", "Hip Replacement", "Volume", 2023, 800.0),
        ];

        let report = build(&medians, &p90, &volumes, &reference, None, 2023)
            .ready()
            .unwrap();

        assert_eq!(report.summary.total_procedures, 3);
        // (100 + 50 + 50) / 3
        assert_eq!(report.summary.avg_compliance, 66.7);
        assert_eq!(report.summary.procedures_above_90pct, 1);
        assert_eq!(report.summary.procedures_below_50pct, 0);
        assert_eq!(
            report.compliance_distribution,
            ComplianceDistribution {
                excellent: 1,
                good: 0,
                fair: 2,
                poor: 0
            }
        );

        let ontario_hip = &report.by_procedure[0];
        assert_eq!(ontario_hip.p90_wait, Some(300.0));
        assert_eq!(ontario_hip.volume, Some(1200.0));
        assert_eq!(ontario_hip.improvement_needed, 0.0);
        assert_eq!(report.by_procedure[1].improvement_needed, 182.0);

        let hips = &report.procedure_summary["Hip Replacement"];
        assert_eq!(hips.avg_compliance, 75.0);
        assert_eq!(hips.total_volume, 2000.0);
        assert_eq!(report.by_category["Orthopedic Surgery"].count, 2);
        assert_eq!(report.by_category["Cardiac Surgery"].avg_median_wait, 28.0);
    }

    #[test]
    fn test_no_rows_is_insufficient() {
        let reference = ReferenceData::default();
        let empty = build(&[], &[], &[], &reference, Some("Ontario"), 2023);
        assert_eq!(empty, Analysis::insufficient(1, 0, "benchmark analysis for 2023"));

        let untargeted = build(&[median("Ontario", "Unknown Procedure", 5.0)], &[], &[], &reference, None, 2023);
        assert!(!untargeted.is_ready());
    }
}
