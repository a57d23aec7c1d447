//! Hypothesis tests: two provinces against each other, and one series over time

use crate::model::{round_to, Analysis, WaitTimeRecord};
use crate::stats::{self, EffectSize};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
    pub is_significant: bool,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectSizeReport {
    pub cohens_d: f64,
    pub magnitude: EffectSize,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvinceComparisonTest {
    pub province1: String,
    pub province2: String,
    pub procedure: String,
    pub years_tested: Vec<i32>,
    pub sample_size_1: usize,
    pub sample_size_2: usize,
    pub mean_1: f64,
    pub mean_2: f64,
    pub median_1: f64,
    pub median_2: f64,
    pub std_1: f64,
    pub std_2: f64,
    pub mean_difference: f64,
    pub t_test: TestOutcome,
    pub mann_whitney: TestOutcome,
    pub effect_size: EffectSizeReport,
    pub interpretation: String,
}

fn magnitude_word(effect: EffectSize) -> &'static str {
    match effect {
        EffectSize::Small => "small",
        EffectSize::Medium => "medium",
        EffectSize::Large => "large",
    }
}

/// Pooled t-test, Mann-Whitney U and Cohen's d on two provinces' yearly values.
/// Needs two values per province.
pub fn compare(
    first: &[&WaitTimeRecord],
    second: &[&WaitTimeRecord],
    names: (&str, &str),
    procedure: &str,
    alpha: f64,
) -> Analysis<ProvinceComparisonTest> {
    let (p1, p2) = names;
    let a: Vec<f64> = first.iter().map(|r| r.value).collect();
    let b: Vec<f64> = second.iter().map(|r| r.value).collect();

    let (Some(t), Some(u)) = (stats::t_test_pooled(&a, &b), stats::mann_whitney_u(&a, &b)) else {
        return Analysis::insufficient(
            2,
            a.len().min(b.len()),
            format!("yearly values per province for {} ({} vs {})", procedure, p1, p2),
        );
    };

    let d = stats::cohens_d(&a, &b);
    let magnitude = EffectSize::from_d(d);
    let (mean_1, mean_2) = (stats::mean(&a), stats::mean(&b));
    let direction = if mean_1 > mean_2 { "longer" } else { "shorter" };

    let t_significant = t.p_value < alpha;
    let t_interpretation = if t_significant {
        format!(
            "{} has significantly {} wait times than {} (p = {:.3}), with a {} effect size (d = {:.2})",
            p1,
            direction,
            p2,
            t.p_value,
            magnitude_word(magnitude),
            d
        )
    } else {
        format!(
            "No statistically significant difference between {} and {} wait times (p = {:.3})",
            p1, p2, t.p_value
        )
    };

    let u_significant = u.p_value < alpha;
    let u_interpretation = if u_significant {
        format!(
            "Wait-time distributions of {} and {} differ significantly (p = {:.3})",
            p1, p2, u.p_value
        )
    } else {
        format!(
            "No statistically significant difference between {} and {} wait-time distributions (p = {:.3})",
            p1, p2, u.p_value
        )
    };

    let years_tested: BTreeSet<i32> = first.iter().chain(second).map(|r| r.year).collect();

    Analysis::Ready(ProvinceComparisonTest {
        province1: p1.to_string(),
        province2: p2.to_string(),
        procedure: procedure.to_string(),
        years_tested: years_tested.into_iter().collect(),
        sample_size_1: a.len(),
        sample_size_2: b.len(),
        mean_1: round_to(mean_1, 1),
        mean_2: round_to(mean_2, 1),
        median_1: round_to(stats::median(&a), 1),
        median_2: round_to(stats::median(&b), 1),
        std_1: round_to(stats::sample_std_dev(&a), 1),
        std_2: round_to(stats::sample_std_dev(&b), 1),
        mean_difference: round_to(mean_1 - mean_2, 1),
        t_test: TestOutcome {
            statistic: round_to(t.statistic, 3),
            p_value: round_to(t.p_value, 4),
            is_significant: t_significant,
            interpretation: t_interpretation.clone(),
        },
        mann_whitney: TestOutcome {
            statistic: u.statistic,
            p_value: round_to(u.p_value, 4),
            is_significant: u_significant,
            interpretation: u_interpretation,
        },
        effect_size: EffectSizeReport {
            cohens_d: round_to(d, 3),
            magnitude,
            interpretation: format!("{} effect size (|d| = {:.2})", magnitude.as_str(), d.abs()),
        },
        interpretation: t_interpretation,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionTest {
    pub slope: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub is_significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MannKendallTest {
    pub statistic: i64,
    pub z: f64,
    pub p_value: f64,
    pub is_significant: bool,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSignificance {
    pub province: String,
    pub procedure: String,
    pub data_points: usize,
    /// "first-last"
    pub year_range: String,
    pub linear_regression: RegressionTest,
    pub mann_kendall: MannKendallTest,
    pub trend_interpretation: String,
}

/// Test one province/procedure series for a trend, both parametric (OLS slope)
/// and rank-based (Mann-Kendall).
pub fn trend_test(
    rows: &[&WaitTimeRecord],
    province: &str,
    procedure: &str,
    min_points: usize,
    alpha: f64,
) -> Analysis<TrendSignificance> {
    let context = || format!("yearly values for {} in {}", procedure, province);
    if rows.len() < min_points {
        return Analysis::insufficient(min_points, rows.len(), context());
    }

    let mut points: Vec<(i32, f64)> = rows.iter().map(|r| (r.year, r.value)).collect();
    points.sort_by_key(|(year, _)| *year);
    let years: Vec<f64> = points.iter().map(|(y, _)| f64::from(*y)).collect();
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

    let Some(fit) = stats::linear_fit(&years, &values) else {
        return Analysis::insufficient(min_points, 1, format!("distinct years: {}", context()));
    };
    let mk = stats::mann_kendall(&values);

    let slope_significant = fit.p_value < alpha;
    let trend_interpretation = if slope_significant {
        let direction = if fit.slope > 0.0 { "increasing" } else { "decreasing" };
        let strength = if fit.r_squared > 0.7 {
            "strong"
        } else if fit.r_squared > 0.4 {
            "moderate"
        } else {
            "weak"
        };
        format!(
            "Statistically significant {} trend with {} correlation (R² = {:.3})",
            direction, strength, fit.r_squared
        )
    } else {
        "No statistically significant trend detected".to_string()
    };

    let mk_significant = mk.p_value < alpha;
    let mk_interpretation = if !mk_significant {
        "No significant monotonic trend".to_string()
    } else if mk.s > 0 {
        "Significant upward monotonic trend".to_string()
    } else {
        "Significant downward monotonic trend".to_string()
    };

    let first_year = points[0].0;
    let last_year = points[points.len() - 1].0;

    Analysis::Ready(TrendSignificance {
        province: province.to_string(),
        procedure: procedure.to_string(),
        data_points: values.len(),
        year_range: format!("{}-{}", first_year, last_year),
        linear_regression: RegressionTest {
            slope: round_to(fit.slope, 3),
            r_squared: round_to(fit.r_squared, 3),
            p_value: round_to(fit.p_value, 4),
            is_significant: slope_significant,
        },
        mann_kendall: MannKendallTest {
            statistic: mk.s,
            z: round_to(mk.z, 3),
            p_value: round_to(mk.p_value, 4),
            is_significant: mk_significant,
            interpretation: mk_interpretation,
        },
        trend_interpretation,
    })
}
