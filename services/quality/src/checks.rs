//! The quality battery. Each check is a pure function over a [`Snapshot`].

use crate::error::CheckFailure;
use crate::snapshot::{FactView, Snapshot};
use common::domain::tables;
use common::{MetricType, Settings};
use serde::Serialize;
use serde_json::{json, Value};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;

pub type CheckResult = Result<Value, CheckFailure>;

pub struct Check {
    pub name: &'static str,
    pub run: fn(&Snapshot, &Settings) -> CheckResult,
}

/// Run order of the battery
pub const CHECKS: [Check; 10] = [
    Check {
        name: "Database Schema Validation",
        run: schema_presence,
    },
    Check {
        name: "Referential Integrity",
        run: referential_integrity,
    },
    Check {
        name: "Data Completeness",
        run: completeness,
    },
    Check {
        name: "Business Rule Validation",
        run: business_rules,
    },
    Check {
        name: "Statistical Outliers",
        run: statistical_outliers,
    },
    Check {
        name: "Data Consistency",
        run: consistency,
    },
    Check {
        name: "Temporal Data Validation",
        run: temporal,
    },
    Check {
        name: "Province Data Validation",
        run: province_coverage,
    },
    Check {
        name: "Procedure Data Validation",
        run: procedure_coverage,
    },
    Check {
        name: "Load Overview",
        run: load_overview,
    },
];

/// Schema, referential integrity and completeness: the structural gate run by
/// [`crate::report::quick_validation`]. They lead [`CHECKS`].
pub fn quick_checks() -> &'static [Check] {
    &CHECKS[..3]
}

const P50: &str = "50th Percentile";
const P90: &str = "90th Percentile";

/// Smallest procedure+metric group that gets z-scores
pub const MIN_OUTLIER_GROUP: usize = 10;
const TOP_OUTLIERS: usize = 10;
const TOP_PROCEDURES: usize = 10;
const EXTREME_YOY_PCT: f64 = 100.0;

// =============================================================================
// Structure
// =============================================================================

pub fn schema_presence(snapshot: &Snapshot, _settings: &Settings) -> CheckResult {
    let missing: Vec<String> = tables::ALL
        .iter()
        .filter(|t| !snapshot.tables.contains(**t))
        .map(|t| t.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CheckFailure::MissingTables(missing));
    }
    Ok(json!({
        "message": format!("All {} tables exist", tables::ALL.len()),
        "row_counts": snapshot.row_counts,
    }))
}

pub fn referential_integrity(snapshot: &Snapshot, _settings: &Settings) -> CheckResult {
    let facts = snapshot.facts()?;
    let provinces: HashSet<i32> = snapshot.provinces()?.iter().map(|p| p.province_id).collect();
    let procedures: HashSet<i32> = snapshot.procedures()?.iter().map(|p| p.procedure_id).collect();
    let metrics: HashSet<i32> = snapshot.metrics()?.iter().map(|m| m.metric_id).collect();
    let periods: HashSet<i32> = snapshot.time_periods()?.iter().map(|t| t.time_id).collect();

    let orphans = [
        (tables::PROVINCES, facts.iter().filter(|f| !provinces.contains(&f.province_id)).count()),
        (tables::PROCEDURES, facts.iter().filter(|f| !procedures.contains(&f.procedure_id)).count()),
        (tables::METRICS, facts.iter().filter(|f| !metrics.contains(&f.metric_id)).count()),
        (tables::TIME_PERIODS, facts.iter().filter(|f| !periods.contains(&f.time_id)).count()),
    ];

    let problems: Vec<String> = orphans
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(table, n)| format!("{} -> {}: {} orphaned records", tables::FACTS, table, n))
        .collect();
    if !problems.is_empty() {
        return Err(CheckFailure::OrphanedRecords(problems));
    }

    let by_table: BTreeMap<&str, usize> = orphans.into_iter().collect();
    Ok(json!({
        "facts_checked": facts.len(),
        "orphaned_records": by_table,
    }))
}

// =============================================================================
// Content
// =============================================================================

pub fn completeness(snapshot: &Snapshot, settings: &Settings) -> CheckResult {
    let facts = snapshot.facts()?;
    let valid = facts.iter().filter(|f| f.result_value.is_some()).count();
    let overall = percent(valid, facts.len());

    let minimum = settings.rules.min_completeness * 100.0;
    if overall < minimum {
        return Err(CheckFailure::LowCompleteness {
            actual: overall,
            minimum,
        });
    }

    let joined = snapshot.joined()?;
    Ok(json!({
        "overall_completeness": round2(overall),
        "total_records": facts.len(),
        "valid_records": valid,
        "dimension_completeness": {
            "provinces": completeness_by(&joined, |v| v.province.province_name.as_str()),
            "procedures": completeness_by(&joined, |v| v.procedure.procedure_name.as_str()),
        },
    }))
}

fn completeness_by<'a, F>(facts: &[FactView<'a>], key: F) -> BTreeMap<&'a str, f64>
where
    F: Fn(&FactView<'a>) -> &'a str,
{
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for view in facts {
        let entry = counts.entry(key(view)).or_default();
        entry.0 += 1;
        if view.result.is_some() {
            entry.1 += 1;
        }
    }
    counts
        .into_iter()
        .map(|(name, (total, valid))| (name, round2(percent(valid, total))))
        .collect()
}

pub fn business_rules(snapshot: &Snapshot, settings: &Settings) -> CheckResult {
    let rules = &settings.rules;
    let joined = snapshot.joined()?;

    let violating = |kind: MetricType, bad: &dyn Fn(f64) -> bool| {
        joined
            .iter()
            .filter(|v| v.metric.kind() == Some(kind))
            .filter_map(|v| v.result)
            .filter(|x| bad(*x))
            .count()
    };

    let unrealistic_waits = violating(MetricType::Percentile, &|x| x < 0.0 || x > rules.max_wait_days);
    let invalid_percentages =
        violating(MetricType::BenchmarkCompliance, &|x| !rules.percentage_in_range(x));
    let invalid_volumes = violating(MetricType::Volume, &|x| x < 0.0 || x.fract() != 0.0);
    let inverted_percentiles: usize = percentile_pairs(&joined)
        .values()
        .map(|(p50s, p90s)| {
            p50s.iter()
                .map(|p50| p90s.iter().filter(|p90| *p90 < p50).count())
                .sum::<usize>()
        })
        .sum();

    let counts = [
        ("unrealistic_wait_times", unrealistic_waits),
        ("invalid_percentages", invalid_percentages),
        ("invalid_volumes", invalid_volumes),
        ("invalid_percentile_relationships", inverted_percentiles),
    ];
    let details: Vec<String> = counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(rule, n)| format!("{}: {} violations", rule, n))
        .collect();
    if !details.is_empty() {
        warn!(violations = %details.join("; "), "business rule violations found");
    }

    let by_rule: BTreeMap<&str, usize> = counts.into_iter().collect();
    Ok(json!(by_rule))
}

/// Non-null 50th/90th percentile results per (province, procedure, period).
/// Duplicate facts keep every value.
fn percentile_pairs(facts: &[FactView<'_>]) -> HashMap<(i32, i32, i32), (Vec<f64>, Vec<f64>)> {
    let mut pairs: HashMap<(i32, i32, i32), (Vec<f64>, Vec<f64>)> = HashMap::new();
    for view in facts {
        let Some(value) = view.result else { continue };
        let key = (
            view.province.province_id,
            view.procedure.procedure_id,
            view.period.time_id,
        );
        match view.metric.metric_name.as_str() {
            P50 => pairs.entry(key).or_default().0.push(value),
            P90 => pairs.entry(key).or_default().1.push(value),
            _ => {}
        }
    }
    pairs
}

#[derive(Debug, Clone, Serialize)]
pub struct Outlier {
    pub province: String,
    pub procedure: String,
    pub metric: String,
    pub year: i32,
    pub value: f64,
    pub mean: f64,
    pub z_score: f64,
}

/// z = |value - mean| / sample std dev within each procedure+metric group of
/// percentile results.
pub fn find_outliers(facts: &[FactView<'_>], threshold: f64) -> Vec<Outlier> {
    let mut groups: BTreeMap<(i32, i32), Vec<(&FactView<'_>, f64)>> = BTreeMap::new();
    for view in facts {
        if view.metric.kind() != Some(MetricType::Percentile) {
            continue;
        }
        if let Some(value) = view.result {
            groups
                .entry((view.procedure.procedure_id, view.metric.metric_id))
                .or_default()
                .push((view, value));
        }
    }

    let mut outliers = Vec::new();
    for group in groups.values() {
        if group.len() < MIN_OUTLIER_GROUP {
            continue;
        }
        let values: Vec<f64> = group.iter().map(|(_, v)| *v).collect();
        let mean = values.iter().mean();
        let std_dev = values.iter().std_dev();
        if !(std_dev > 0.0) {
            continue;
        }
        for (view, value) in group {
            let z_score = (value - mean).abs() / std_dev;
            if z_score > threshold {
                outliers.push(Outlier {
                    province: view.province.province_name.clone(),
                    procedure: view.procedure.procedure_name.clone(),
                    metric: view.metric.metric_name.clone(),
                    year: view.period.fiscal_year,
                    value: *value,
                    mean,
                    z_score,
                });
            }
        }
    }
    outliers.sort_by(|a, b| b.z_score.total_cmp(&a.z_score));
    outliers
}

pub fn statistical_outliers(snapshot: &Snapshot, settings: &Settings) -> CheckResult {
    let joined = snapshot.joined()?;
    let outliers = find_outliers(&joined, settings.rules.outlier_z);
    let scores: Vec<f64> = outliers.iter().map(|o| o.z_score).collect();
    let avg_z = if scores.is_empty() { 0.0 } else { scores.iter().mean() };

    Ok(json!({
        "total_outliers": outliers.len(),
        "extreme_outliers": scores.iter().filter(|z| **z > 3.0).count(),
        "significant_outliers": scores.iter().filter(|z| **z > 2.0).count(),
        "avg_z_score": avg_z,
        "max_z_score": scores.first().copied().unwrap_or(0.0),
        "top_outliers": &outliers[..outliers.len().min(TOP_OUTLIERS)],
    }))
}

pub fn consistency(snapshot: &Snapshot, _settings: &Settings) -> CheckResult {
    let mut natural_keys: HashMap<(i32, i32, i32, i32), usize> = HashMap::new();
    for f in snapshot.facts()? {
        *natural_keys
            .entry((f.province_id, f.procedure_id, f.metric_id, f.time_id))
            .or_default() += 1;
    }
    let duplicates = natural_keys.values().filter(|n| **n > 1).count();

    let joined = snapshot.joined()?;
    let incomplete_pairs = percentile_pairs(&joined)
        .values()
        .filter(|(p50s, p90s)| p50s.is_empty() != p90s.is_empty())
        .count();

    let mut codes: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for p in snapshot.provinces()? {
        codes
            .entry(p.province_name.as_str())
            .or_default()
            .insert(p.province_code.as_str());
    }
    let name_conflicts = codes.values().filter(|c| c.len() > 1).count();

    Ok(json!({
        "duplicate_records": duplicates,
        "incomplete_percentile_pairs": incomplete_pairs,
        "province_name_inconsistencies": name_conflicts,
    }))
}

pub fn temporal(snapshot: &Snapshot, _settings: &Settings) -> CheckResult {
    let joined = snapshot.joined()?;

    let mut series: HashMap<(&str, &str), BTreeSet<i32>> = HashMap::new();
    for view in joined.iter().filter(|v| v.result.is_some()) {
        series
            .entry((
                view.procedure.procedure_name.as_str(),
                view.province.province_name.as_str(),
            ))
            .or_default()
            .insert(view.period.fiscal_year);
    }

    let (mut total_series, mut with_gaps, mut coverage_sum) = (0usize, 0usize, 0.0);
    for years in series.values() {
        let (Some(first), Some(last)) = (years.first(), years.last()) else { continue };
        let expected = (last - first + 1) as usize;
        if expected <= 1 {
            continue;
        }
        total_series += 1;
        if years.len() < expected {
            with_gaps += 1;
        }
        coverage_sum += years.len() as f64 / expected as f64;
    }

    let mut by_year: HashMap<(i32, i32, i32), BTreeMap<i32, Vec<f64>>> = HashMap::new();
    for view in &joined {
        if let Some(value) = view.result {
            by_year
                .entry((
                    view.province.province_id,
                    view.procedure.procedure_id,
                    view.metric.metric_id,
                ))
                .or_default()
                .entry(view.period.fiscal_year)
                .or_default()
                .push(value);
        }
    }

    let mut changes = Vec::new();
    for years in by_year.values() {
        for (year, current) in years {
            let Some(previous) = years.get(&(year - 1)) else { continue };
            for prev in previous.iter().filter(|p| **p > 0.0) {
                for cur in current {
                    changes.push((cur - prev).abs() / prev * 100.0);
                }
            }
        }
    }

    let coverage_ratio = if total_series == 0 { 0.0 } else { coverage_sum / total_series as f64 };
    let avg_change = if changes.is_empty() { 0.0 } else { changes.iter().mean() };

    Ok(json!({
        "total_time_series": total_series,
        "series_with_gaps": with_gaps,
        "average_coverage_ratio": coverage_ratio,
        "total_yoy_comparisons": changes.len(),
        "extreme_yoy_changes": changes.iter().filter(|c| **c > EXTREME_YOY_PCT).count(),
        "avg_yoy_change_percent": avg_change,
        "max_yoy_change_percent": changes.iter().copied().fold(0.0, f64::max),
    }))
}

// =============================================================================
// Coverage
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProvinceCoverage {
    pub province: String,
    pub total_records: usize,
    pub valid_records: usize,
    pub procedures_covered: usize,
    pub years_covered: usize,
}

pub fn province_coverage(snapshot: &Snapshot, settings: &Settings) -> CheckResult {
    let provinces = snapshot.provinces()?;
    let facts = snapshot.facts()?;
    let years: HashMap<i32, i32> = snapshot
        .time_periods()?
        .iter()
        .map(|t| (t.time_id, t.fiscal_year))
        .collect();

    let expected: BTreeSet<&str> = settings.reference.provinces.keys().map(String::as_str).collect();
    let actual: BTreeSet<&str> = provinces.iter().map(|p| p.province_name.as_str()).collect();

    let mut coverage: Vec<ProvinceCoverage> = actual
        .iter()
        .map(|name| {
            let ids: HashSet<i32> = provinces
                .iter()
                .filter(|p| p.province_name == *name)
                .map(|p| p.province_id)
                .collect();
            let own: Vec<_> = facts.iter().filter(|f| ids.contains(&f.province_id)).collect();
            ProvinceCoverage {
                province: name.to_string(),
                total_records: own.len(),
                valid_records: own.iter().filter(|f| f.result_value.is_some()).count(),
                procedures_covered: own.iter().map(|f| f.procedure_id).collect::<HashSet<_>>().len(),
                years_covered: own
                    .iter()
                    .filter_map(|f| years.get(&f.time_id))
                    .collect::<HashSet<_>>()
                    .len(),
            }
        })
        .collect();
    coverage.sort_by(|a, b| b.valid_records.cmp(&a.valid_records).then(a.province.cmp(&b.province)));

    Ok(json!({
        "missing_provinces": expected.difference(&actual).collect::<Vec<_>>(),
        "unexpected_provinces": actual.difference(&expected).collect::<Vec<_>>(),
        "province_coverage": coverage,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcedureUsage {
    pub procedure: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub usage_count: usize,
}

pub fn procedure_coverage(snapshot: &Snapshot, _settings: &Settings) -> CheckResult {
    let mut usage_by_id: HashMap<i32, usize> = HashMap::new();
    for f in snapshot.facts()? {
        *usage_by_id.entry(f.procedure_id).or_default() += 1;
    }

    let mut usage: Vec<ProcedureUsage> = snapshot
        .procedures()?
        .iter()
        .map(|p| ProcedureUsage {
            procedure: p.procedure_name.clone(),
            category: p.procedure_category.clone(),
            priority: p.clinical_priority.clone(),
            usage_count: usage_by_id.get(&p.procedure_id).copied().unwrap_or(0),
        })
        .collect();
    usage.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then(a.procedure.cmp(&b.procedure)));

    let unused: Vec<&str> = usage
        .iter()
        .filter(|u| u.usage_count == 0)
        .map(|u| u.procedure.as_str())
        .collect();

    Ok(json!({
        "total_procedures": usage.len(),
        "unused_procedures": unused.len(),
        "procedure_usage": &usage[..usage.len().min(TOP_PROCEDURES)],
        "unused_procedure_list": unused,
    }))
}

/// Headline numbers for the loaded data plus the most recent load audit row
pub fn load_overview(snapshot: &Snapshot, _settings: &Settings) -> CheckResult {
    let facts = snapshot.facts()?;
    let years: HashMap<i32, i32> = snapshot
        .time_periods()?
        .iter()
        .map(|t| (t.time_id, t.fiscal_year))
        .collect();
    let latest_load = snapshot.latest_load()?;

    let fact_years: BTreeSet<i32> = facts.iter().filter_map(|f| years.get(&f.time_id).copied()).collect();
    let span = match (fact_years.first(), fact_years.last()) {
        (Some(first), Some(last)) => Some(format!("{}-{}", first, last)),
        _ => None,
    };

    let joined = snapshot.joined()?;
    let compliance: Vec<f64> = joined
        .iter()
        .filter(|v| v.metric.kind() == Some(MetricType::BenchmarkCompliance))
        .filter_map(|v| v.result)
        .collect();
    let compliance_rate = if compliance.is_empty() { 0.0 } else { round2(compliance.iter().mean()) };

    Ok(json!({
        "provinces_with_data": facts.iter().map(|f| f.province_id).collect::<HashSet<_>>().len(),
        "procedures_with_data": facts.iter().map(|f| f.procedure_id).collect::<HashSet<_>>().len(),
        "years_with_data": fact_years.len(),
        "total_fact_records": facts.len(),
        "valid_fact_records": facts.iter().filter(|f| f.result_value.is_some()).count(),
        "data_span_years": span,
        "benchmark_records": compliance.len(),
        "overall_compliance_rate": compliance_rate,
        "latest_load": latest_load,
    }))
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
