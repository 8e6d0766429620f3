//! Statistical primitives for fatigue detection and experiment analysis
//!
//! Proportions are compared with a pooled two-proportion Z-test; daily rate
//! samples with a pooled-variance two-sample Z-score; ratio metrics (CPA,
//! CPC, ROAS) with a log-ratio Z-test on their event counts.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::collections::BTreeSet;

/// Z-scores are capped so zero-variance samples stay finite
pub const Z_CAP: f64 = 10.0;

/// Result of a two-sample comparison
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZTest {
    pub z: f64,
    /// Two-tailed
    pub p_value: f64,
    /// Unpooled standard error of the difference, for confidence intervals
    pub standard_error: f64,
}

/// Two-proportion Z-test
///
/// Returns None below `min_sample` trials per arm (need at least 30 for CLT).
pub fn proportion_z_test(
    successes_a: u64,
    trials_a: u64,
    successes_b: u64,
    trials_b: u64,
    min_sample: u64,
) -> Option<ZTest> {
    if trials_a < min_sample.max(1) || trials_b < min_sample.max(1) {
        return None;
    }

    let n_a = trials_a as f64;
    let n_b = trials_b as f64;
    let p_a = successes_a as f64 / n_a;
    let p_b = successes_b as f64 / n_b;

    // Pooled proportion
    let p_pool = (successes_a + successes_b) as f64 / (n_a + n_b);

    // Standard error using pooled proportion
    let se_pooled = (p_pool * (1.0 - p_pool) * (1.0 / n_a + 1.0 / n_b)).sqrt();
    let se_unpooled = (p_a * (1.0 - p_a) / n_a + p_b * (1.0 - p_b) / n_b).sqrt();

    let z = capped_z(p_b - p_a, se_pooled);
    Some(ZTest {
        z,
        p_value: two_sided_p(z),
        standard_error: se_unpooled,
    })
}

/// Pooled-variance two-sample Z-score of `recent` against `baseline`
///
/// Negative when the recent mean is lower. None with fewer than two samples
/// on either side.
pub fn pooled_two_sample_z(baseline: &[f64], recent: &[f64]) -> Option<f64> {
    if baseline.len() < 2 || recent.len() < 2 {
        return None;
    }

    let (mean_b, var_b) = mean_variance(baseline);
    let (mean_r, var_r) = mean_variance(recent);
    let n_b = baseline.len() as f64;
    let n_r = recent.len() as f64;

    let pooled = ((n_b - 1.0) * var_b + (n_r - 1.0) * var_r) / (n_b + n_r - 2.0);
    let se = (pooled * (1.0 / n_b + 1.0 / n_r)).sqrt();
    Some(capped_z(mean_r - mean_b, se))
}

/// Log-ratio Z-test for `value_b / value_a` where each value is an amount
/// divided by an event count
pub fn log_ratio_z_test(
    value_a: f64,
    count_a: u64,
    value_b: f64,
    count_b: u64,
    min_sample: u64,
) -> Option<(f64, ZTest)> {
    if count_a < min_sample.max(1) || count_b < min_sample.max(1) {
        return None;
    }
    if value_a <= 0.0 || value_b <= 0.0 {
        return None;
    }

    let log_ratio = (value_b / value_a).ln();
    let se = (1.0 / count_a as f64 + 1.0 / count_b as f64).sqrt();
    let z = capped_z(log_ratio, se);
    Some((
        log_ratio,
        ZTest {
            z,
            p_value: two_sided_p(z),
            standard_error: se,
        },
    ))
}

fn capped_z(difference: f64, se: f64) -> f64 {
    // Avoid division by zero or NaN
    if se == 0.0 || se.is_nan() {
        if difference > 0.0 {
            return Z_CAP;
        } else if difference < 0.0 {
            return -Z_CAP;
        }
        return 0.0;
    }
    (difference / se).clamp(-Z_CAP, Z_CAP)
}

/// Sample mean and unbiased variance
pub fn mean_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

/// Two-tailed p-value: 2 * (1 - CDF(|z|))
pub fn two_sided_p(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

/// Standard normal quantile
pub fn z_quantile(p: f64) -> f64 {
    standard_normal().map_or(f64::NAN, |n| n.inverse_cdf(p))
}

/// Standard normal density
pub fn normal_pdf(x: f64) -> f64 {
    standard_normal().map_or(f64::NAN, |n| n.pdf(x))
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    standard_normal().map_or(f64::NAN, |n| n.cdf(x))
}

/// Per-arm sample size for a two-proportion test
///
/// `baseline` is the assumed control rate and `mde` the relative lift to
/// detect. Smaller effects always need larger samples.
pub fn required_sample_size(baseline: f64, mde: f64, alpha: f64, power: f64) -> u64 {
    let p1 = baseline;
    let p2 = baseline * (1.0 + mde);
    let p_bar = (p1 + p2) / 2.0;

    let z_alpha = z_quantile(1.0 - alpha / 2.0);
    let z_beta = z_quantile(power);

    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let n = numerator.powi(2) / (p2 - p1).powi(2);

    if n.is_finite() && n > 0.0 {
        n.ceil() as u64
    } else {
        0
    }
}

/// Power reached with `n` trials per arm for rates `p1` versus `p2`
pub fn achieved_power(p1: f64, p2: f64, n: u64, alpha: f64) -> f64 {
    if n == 0 || p1 == p2 {
        return 0.0;
    }
    let n = n as f64;
    let se = ((p1 * (1.0 - p1) + p2 * (1.0 - p2)) / n).sqrt();
    if se == 0.0 {
        return 0.0;
    }
    let z_alpha = z_quantile(1.0 - alpha / 2.0);
    normal_cdf((p2 - p1).abs() / se - z_alpha).clamp(0.0, 1.0)
}

/// O'Brien-Fleming alpha spent at information fraction `t`
pub fn obrien_fleming_alpha(alpha: f64, t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let t = t.min(1.0);
    let z = z_quantile(1.0 - alpha / 2.0);
    (2.0 * (1.0 - normal_cdf(z / t.sqrt()))).clamp(0.0, alpha)
}

/// Jaccard similarity of two token sets; two empty sets are identical
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
