//! Textbook statistics used by the analyses.
//!
//! Distribution functions come from `statrs`; everything else is computed here.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use statrs::statistics::Statistics;
use std::cmp::Ordering;

/// Ordinary least squares fit of `y` on `x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// 0 when `y` has no variance
    pub r_squared: f64,
    /// Two-sided p-value of the slope (Student t, n - 2 degrees of freedom)
    pub p_value: f64,
    pub n: usize,
}

/// `None` for fewer than two points or when every `x` is the same.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let x_mean = x.mean();
    let y_mean = y.mean();

    let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - x_mean) * (yi - y_mean)).sum();
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let ss_tot: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let ss_res: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (yi - (intercept + slope * xi)).powi(2))
        .sum();
    let r_squared = if ss_tot == 0.0 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    let df = n as f64 - 2.0;
    let p_value = if df <= 0.0 {
        f64::NAN
    } else if ss_res == 0.0 {
        if slope == 0.0 { 1.0 } else { 0.0 }
    } else {
        let std_err = (ss_res / df / sxx).sqrt();
        students_t_two_sided(slope / std_err, df)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
        p_value,
        n,
    })
}

/// Population standard deviation (divides by n)
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.population_std_dev()
}

/// Sample standard deviation (divides by n - 1); 0 below two values
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.std_dev()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.mean()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Two-sided p-value for a Student t statistic
pub fn students_t_two_sided(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value for a standard normal statistic
pub fn normal_two_sided(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(z.abs()))).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestStatistic {
    pub statistic: f64,
    pub p_value: f64,
}

/// Pooled-variance two-sample t-test. Needs at least two values per group.
pub fn t_test_pooled(a: &[f64], b: &[f64]) -> Option<TestStatistic> {
    let (n1, n2) = (a.len(), b.len());
    if n1 < 2 || n2 < 2 {
        return None;
    }
    let df = (n1 + n2 - 2) as f64;
    let pooled = pooled_std_dev(a, b);
    let diff = mean(a) - mean(b);

    let statistic = if pooled == 0.0 {
        if diff == 0.0 {
            0.0
        } else {
            diff.signum() * f64::INFINITY
        }
    } else {
        diff / (pooled * (1.0 / n1 as f64 + 1.0 / n2 as f64).sqrt())
    };
    let p_value = if pooled == 0.0 && diff == 0.0 {
        1.0
    } else {
        students_t_two_sided(statistic, df)
    };
    Some(TestStatistic { statistic, p_value })
}

fn pooled_std_dev(a: &[f64], b: &[f64]) -> f64 {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let var = |v: &[f64]| if v.len() < 2 { 0.0 } else { v.variance() };
    (((n1 - 1.0) * var(a) + (n2 - 1.0) * var(b)) / (n1 + n2 - 2.0)).sqrt()
}

/// Standardized mean difference with the pooled sample standard deviation.
/// 0 when the pooled deviation is 0.
pub fn cohens_d(a: &[f64], b: &[f64]) -> f64 {
    if a.len() + b.len() < 3 {
        return 0.0;
    }
    let pooled = pooled_std_dev(a, b);
    if pooled <= 0.0 || pooled.is_nan() {
        0.0
    } else {
        (mean(a) - mean(b)) / pooled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EffectSize {
    Small,
    Medium,
    Large,
}

impl EffectSize {
    /// |d| < 0.2 small, < 0.8 medium, otherwise large
    pub fn from_d(d: f64) -> Self {
        let d = d.abs();
        if d < 0.2 {
            EffectSize::Small
        } else if d < 0.8 {
            EffectSize::Medium
        } else {
            EffectSize::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectSize::Small => "Small",
            EffectSize::Medium => "Medium",
            EffectSize::Large => "Large",
        }
    }
}

/// Average ranks (1-based), ties sharing the mean of their positions
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].partial_cmp(&values[j]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }
    ranks
}

/// Mann-Whitney U for the first sample with a two-sided p-value from the normal
/// approximation, corrected for ties and continuity.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Option<TestStatistic> {
    let (n1, n2) = (a.len(), b.len());
    if n1 == 0 || n2 == 0 {
        return None;
    }
    let combined: Vec<f64> = a.iter().chain(b).copied().collect();
    let ranks = average_ranks(&combined);
    let rank_sum: f64 = ranks[..n1].iter().sum();

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let n = n1f + n2f;
    let u1 = rank_sum - n1f * (n1f + 1.0) / 2.0;
    let mu = n1f * n2f / 2.0;

    let mut sorted = combined.clone();
    sorted.sort_by(|x, y| x.total_cmp(y));
    let mut tie_term = 0.0;
    for group in sorted.chunk_by(|x, y| x == y) {
        let t = group.len() as f64;
        tie_term += t * t * t - t;
    }
    let variance = n1f * n2f / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));

    let p_value = if variance <= 0.0 || n < 2.0 {
        1.0
    } else {
        let z = ((u1 - mu).abs() - 0.5).max(0.0) / variance.sqrt();
        normal_two_sided(z)
    };
    Some(TestStatistic {
        statistic: u1,
        p_value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MannKendall {
    /// Sum of signs over all ordered pairs
    pub s: i64,
    pub z: f64,
    pub p_value: f64,
}

/// Mann-Kendall monotonic trend test on a series in time order
pub fn mann_kendall(series: &[f64]) -> MannKendall {
    let n = series.len();
    let mut s: i64 = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            match series[j].partial_cmp(&series[i]) {
                Some(Ordering::Greater) => s += 1,
                Some(Ordering::Less) => s -= 1,
                _ => {}
            }
        }
    }

    let nf = n as f64;
    let variance = nf * (nf - 1.0) * (2.0 * nf + 5.0) / 18.0;
    let z = if variance <= 0.0 {
        0.0
    } else {
        match s.cmp(&0) {
            Ordering::Greater => (s - 1) as f64 / variance.sqrt(),
            Ordering::Less => (s + 1) as f64 / variance.sqrt(),
            Ordering::Equal => 0.0,
        }
    };

    MannKendall {
        s,
        z,
        p_value: normal_two_sided(z),
    }
}
