//! Advisory business-rule checks over cleaned rows. Never rejects or edits a row.

use crate::transform::CleanRecord;
use common::config::{ReferenceData, RuleSettings, Settings};
use common::MetricType;
use std::collections::HashMap;
use tracing::warn;

const P50: &str = "50th Percentile";
const P90: &str = "90th Percentile";

pub struct Validator<'a> {
    rules: &'a RuleSettings,
    reference: &'a ReferenceData,
}

impl<'a> Validator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            rules: &settings.rules,
            reference: &settings.reference,
        }
    }

    /// One summary string per check that fires.
    pub fn validate(&self, records: &[CleanRecord]) -> Vec<String> {
        let checks = [
            self.null_required_fields(records),
            self.years_out_of_range(records),
            self.excessive_waits(records),
            self.percentages_out_of_range(records),
            self.inverted_percentiles(records),
        ];

        let issues: Vec<String> = checks.into_iter().flatten().collect();
        for issue in &issues {
            warn!(%issue, "validation issue");
        }
        issues
    }

    fn null_required_fields(&self, records: &[CleanRecord]) -> Option<String> {
        let counts = [
            ("province", records.iter().filter(|r| r.province.trim().is_empty()).count()),
            ("procedure", records.iter().filter(|r| r.procedure.trim().is_empty()).count()),
            ("metric", records.iter().filter(|r| r.metric.is_none()).count()),
        ];
        let fired: Vec<String> = counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(field, n)| format!("{}={}", field, n))
            .collect();
        (!fired.is_empty()).then(|| format!("Null values in required fields: {}", fired.join(", ")))
    }

    fn years_out_of_range(&self, records: &[CleanRecord]) -> Option<String> {
        let n = records
            .iter()
            .filter(|r| !self.rules.year_in_range(r.year))
            .count();
        (n > 0).then(|| {
            format!(
                "{} records with years outside {}-{}",
                n, self.rules.min_year, self.rules.max_year
            )
        })
    }

    fn excessive_waits(&self, records: &[CleanRecord]) -> Option<String> {
        let n = records
            .iter()
            .filter(|r| self.metric_type(r) == Some(MetricType::Percentile))
            .filter(|r| r.result.map(|v| v > self.rules.max_wait_days).unwrap_or(false))
            .count();
        (n > 0).then(|| {
            format!(
                "{} wait times exceed {} days",
                n, self.rules.max_wait_days
            )
        })
    }

    fn percentages_out_of_range(&self, records: &[CleanRecord]) -> Option<String> {
        let n = records
            .iter()
            .filter(|r| self.metric_type(r) == Some(MetricType::BenchmarkCompliance))
            .filter(|r| {
                r.result
                    .map(|v| !self.rules.percentage_in_range(v))
                    .unwrap_or(false)
            })
            .count();
        (n > 0).then(|| {
            format!(
                "{} benchmark percentages outside {}-{}",
                n, self.rules.min_percentage, self.rules.max_percentage
            )
        })
    }

    /// (province, procedure, year) triples whose 90th percentile is below the 50th
    fn inverted_percentiles(&self, records: &[CleanRecord]) -> Option<String> {
        let mut pairs: HashMap<(&str, &str, i32), (Option<f64>, Option<f64>)> = HashMap::new();
        for r in records {
            let Some(value) = r.result else { continue };
            let key = (r.province.as_str(), r.procedure.as_str(), r.year);
            match r.metric.as_deref() {
                Some(P50) => pairs.entry(key).or_default().0 = Some(value),
                Some(P90) => pairs.entry(key).or_default().1 = Some(value),
                _ => {}
            }
        }
        let n = pairs
            .values()
            .filter(|pair| matches!(pair, (Some(p50), Some(p90)) if p90 < p50))
            .count();
        (n > 0).then(|| {
            format!(
                "{} province/procedure/year combinations have 90th percentile below 50th percentile",
                n
            )
        })
    }

    fn metric_type(&self, record: &CleanRecord) -> Option<MetricType> {
        record
            .metric
            .as_deref()
            .and_then(|m| self.reference.metric_type_of(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::QualityFlag;

    fn record(province: &str, metric: Option<&str>, year: i32, result: Option<f64>) -> CleanRecord {
        CleanRecord {
            reporting_level: Some("Provincial".to_string()),
            province: province.to_string(),
            region: None,
            procedure: "Hip Replacement".to_string(),
            metric: metric.map(str::to_string),
            year,
            unit: None,
            result,
            quality_flag: QualityFlag::for_result(result),
        }
    }

    fn validate(records: &[CleanRecord]) -> Vec<String> {
        let settings = Settings::default();
        Validator::new(&settings).validate(records)
    }

    #[test]
    fn test_clean_data_has_no_issues() {
        let issues = validate(&[
            record("Ontario", Some(P50), 2019, Some(120.0)),
            record("Ontario", Some(P90), 2019, Some(300.0)),
            record("Ontario", Some("% Meeting Benchmark"), 2019, Some(72.0)),
            record("Ontario", Some("Volume"), 2019, None),
        ]);
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_each_check_fires_once() {
        let issues = validate(&[
            record("Ontario", None, 2019, Some(1.0)),
            record("Ontario", None, 2019, Some(1.0)),
            record("Ontario", Some(P50), 2031, Some(10.0)),
            record("Ontario", Some(P90), 2019, Some(900.0)),
            record("Ontario", Some(P90), 2020, Some(800.0)),
            record("Ontario", Some("% Meeting Benchmark"), 2019, Some(140.0)),
        ]);
        assert_eq!(issues.len(), 4, "{:?}", issues);
        assert!(issues[0].contains("metric=2"));
        assert!(issues[1].contains("1 records with years outside 2008-2025"));
        assert!(issues[2].starts_with("2 wait times exceed"));
        assert!(issues[3].starts_with("1 benchmark percentages"));
    }

    #[test]
    fn test_bad_year_is_a_range_issue_not_a_null() {
        // the cleaner never emits a record without a year
        let issues = validate(&[record("Ontario", Some(P50), 0, Some(10.0))]);
        assert_eq!(issues.len(), 1, "{:?}", issues);
        assert!(issues[0].starts_with("1 records with years outside"));
    }

    #[test]
    fn test_inverted_percentiles_are_reported() {
        let issues = validate(&[
            record("Ontario", Some(P50), 2019, Some(200.0)),
            record("Ontario", Some(P90), 2019, Some(150.0)),
            record("Quebec", Some(P50), 2019, Some(100.0)),
            record("Quebec", Some(P90), 2019, None),
        ]);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("1 province/procedure/year"));
    }
}
