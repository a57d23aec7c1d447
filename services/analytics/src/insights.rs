//! Rule-based findings, alerts and recommendations

use crate::model::WaitTimeRecord;
use crate::stats;
use crate::trends::TrendResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Waits this many times the latest-year average are flagged
const HIGH_WAIT_FACTOR: f64 = 1.5;
const MAX_FOCUS_RECOMMENDATIONS: usize = 3;
const COMPLIANCE_ALERT_BELOW: f64 = 75.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Insights {
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub alerts: Vec<String>,
}

/// `avg_compliance` is the benchmark average when a procedure was requested.
pub fn synthesize(
    trends: &BTreeMap<String, TrendResult>,
    rows: &[WaitTimeRecord],
    avg_compliance: Option<f64>,
) -> Insights {
    let mut insights = Insights::default();

    let worsening = trends.values().filter(|t| t.trend_category.is_worsening()).count();
    if worsening > 0 {
        insights.alerts.push(format!(
            "{} procedure-province combinations show increasing wait times",
            worsening
        ));
    }
    let improving = trends.values().filter(|t| t.trend_category.is_improving()).count();
    if improving > 0 {
        insights.key_findings.push(format!(
            "{} procedure-province combinations show improving wait times",
            improving
        ));
    }

    if let Some(latest_year) = rows.iter().map(|r| r.year).max() {
        let latest: Vec<&WaitTimeRecord> = rows.iter().filter(|r| r.year == latest_year).collect();
        let values: Vec<f64> = latest.iter().map(|r| r.value).collect();
        let average = stats::mean(&values);

        let mut high: Vec<&WaitTimeRecord> = latest
            .into_iter()
            .filter(|r| r.value > HIGH_WAIT_FACTOR * average)
            .collect();
        if !high.is_empty() {
            insights.alerts.push(format!(
                "{} procedures have wait times >50% above average",
                high.len()
            ));
            high.sort_by(|a, b| b.value.total_cmp(&a.value));
            for row in high.iter().take(MAX_FOCUS_RECOMMENDATIONS) {
                insights.recommendations.push(format!(
                    "Focus on {} in {} (current wait: {:.1} days)",
                    row.procedure, row.province, row.value
                ));
            }
        }
    }

    if let Some(compliance) = avg_compliance.filter(|c| *c < COMPLIANCE_ALERT_BELOW) {
        insights.alerts.push(format!(
            "Average benchmark compliance is {:.1}% - below target",
            compliance
        ));
        insights.recommendations.push(
            "Implement targeted improvement initiatives for procedures with <75% benchmark compliance"
                .to_string(),
        );
    }

    insights
}
