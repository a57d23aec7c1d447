//! One procedure across provinces for a single year

use crate::model::{round_to, Analysis, WaitTimeRecord};
use crate::stats;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PerformanceCategory {
    #[serde(rename = "Better than Average")]
    BetterThanAverage,
    #[serde(rename = "Near Average")]
    NearAverage,
    #[serde(rename = "Worse than Average")]
    WorseThanAverage,
}

impl PerformanceCategory {
    /// More than 10% either side of the average
    pub fn relative_to(wait: f64, average: f64) -> Self {
        if wait < 0.9 * average {
            PerformanceCategory::BetterThanAverage
        } else if wait > 1.1 * average {
            PerformanceCategory::WorseThanAverage
        } else {
            PerformanceCategory::NearAverage
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performer {
    pub name: String,
    pub wait_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadStatistics {
    pub median: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    pub range: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvinceStanding {
    pub province: String,
    pub wait_time: f64,
    pub variance_from_avg: f64,
    /// 1 is the shortest wait
    pub rank: usize,
    /// Share of the other provinces with a longer wait
    pub percentile_rank: f64,
    pub performance_category: PerformanceCategory,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvincialComparison {
    pub procedure: String,
    pub year: i32,
    pub national_average: f64,
    pub best_performer: Performer,
    pub worst_performer: Performer,
    pub statistics: SpreadStatistics,
    /// Shortest wait first
    pub provincial_data: Vec<ProvinceStanding>,
}

/// Rank provinces by wait. Several rows for one province are averaged.
/// Needs at least two provinces.
pub fn build(
    rows: &[&WaitTimeRecord],
    volumes: &[&WaitTimeRecord],
    procedure: &str,
    year: i32,
) -> Analysis<ProvincialComparison> {
    let mut by_province: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        by_province.entry(row.province.as_str()).or_default().push(row.value);
    }
    if by_province.len() < 2 {
        return Analysis::insufficient(
            2,
            by_province.len(),
            format!("provinces reporting {} in {}", procedure, year),
        );
    }

    let mut waits: Vec<(&str, f64)> = by_province
        .into_iter()
        .map(|(province, values)| (province, stats::mean(&values)))
        .collect();
    waits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let values: Vec<f64> = waits.iter().map(|(_, w)| *w).collect();
    let average = stats::mean(&values);
    let n = waits.len();
    let (best_name, best_wait) = waits[0];
    let (worst_name, worst_wait) = waits[n - 1];

    let provincial_data = waits
        .iter()
        .enumerate()
        .map(|(i, (province, wait))| {
            let rank = i + 1;
            ProvinceStanding {
                province: province.to_string(),
                wait_time: *wait,
                variance_from_avg: round_to(wait - average, 1),
                rank,
                percentile_rank: round_to((n - rank) as f64 / (n - 1) as f64 * 100.0, 1),
                performance_category: PerformanceCategory::relative_to(*wait, average),
                volume: volumes
                    .iter()
                    .find(|v| v.province == *province)
                    .map(|v| v.value),
            }
        })
        .collect();

    Analysis::Ready(ProvincialComparison {
        procedure: procedure.to_string(),
        year,
        national_average: round_to(average, 1),
        best_performer: Performer {
            name: best_name.to_string(),
            wait_time: best_wait,
        },
        worst_performer: Performer {
            name: worst_name.to_string(),
            wait_time: worst_wait,
        },
        statistics: SpreadStatistics {
            median: round_to(stats::median(&values), 1),
            std_dev: round_to(stats::sample_std_dev(&values), 1),
            range: round_to(worst_wait - best_wait, 1),
        },
        provincial_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(province: &str, value: f64) -> WaitTimeRecord {
        WaitTimeRecord::new(province, "Knee Replacement", "50th Percentile", 2023, value)
    }

    #[test]
    fn test_three_province_scenario() {
        let rows = [row("Quebec", 200.0), row("Alberta", 100.0), row("Ontario", 150.0)];
        let volumes = [WaitTimeRecord::new("Ontario", "Knee Replacement", "Volume", 2023, 5000.0)];
        let rows: Vec<&WaitTimeRecord> = rows.iter().collect();
        let volumes: Vec<&WaitTimeRecord> = volumes.iter().collect();

        let cmp = build(&rows, &volumes, "Knee Replacement", 2023).ready().unwrap();
        assert_eq!(cmp.national_average, 150.0);
        assert_eq!(cmp.best_performer.name, "Alberta");
        assert_eq!(cmp.best_performer.wait_time, 100.0);
        assert_eq!(cmp.worst_performer.name, "Quebec");
        assert_eq!(cmp.worst_performer.wait_time, 200.0);
        assert_eq!(cmp.statistics.range, 100.0);
        assert_eq!(cmp.statistics.median, 150.0);
        assert_eq!(cmp.statistics.std_dev, 50.0);

        let order: Vec<&str> = cmp.provincial_data.iter().map(|p| p.province.as_str()).collect();
        assert_eq!(order, vec!["Alberta", "Ontario", "Quebec"]);
        let alberta = &cmp.provincial_data[0];
        assert_eq!(alberta.rank, 1);
        assert_eq!(alberta.percentile_rank, 100.0);
        assert_eq!(alberta.variance_from_avg, -50.0);
        assert_eq!(alberta.performance_category, PerformanceCategory::BetterThanAverage);
        assert_eq!(cmp.provincial_data[1].performance_category, PerformanceCategory::NearAverage);
        assert_eq!(cmp.provincial_data[1].volume, Some(5000.0));
        assert_eq!(cmp.provincial_data[2].percentile_rank, 0.0);
    }

    #[test]
    fn test_single_province_is_insufficient() {
        let rows = [row("Ontario", 150.0), row("Ontario", 160.0)];
        let rows: Vec<&WaitTimeRecord> = rows.iter().collect();
        match build(&rows, &[], "Knee Replacement", 2023) {
            Analysis::InsufficientData { required, available, .. } => {
                assert_eq!((required, available), (2, 1));
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }
    }
}
