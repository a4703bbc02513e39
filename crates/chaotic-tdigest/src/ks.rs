//! Two-sample Kolmogorov-Smirnov comparison over digests.
//!
//! The statistic is the largest CDF gap sampled at evenly spaced points,
//! which approximates the exact two-sample statistic computed from the
//! raw sorted samples. The approximation tightens as `num_samples` and
//! the digests' compression grow.

use crate::digest::Digest;

/// Number of evaluation points used by [`ks_test`] callers that have no
/// better choice.
pub const DEFAULT_KS_SAMPLES: usize = 10;

/// Largest `|a.cdf(x) - b.cdf(x)|` over `num_samples` points strictly
/// inside the combined value range of both digests.
///
/// NaN when either digest is empty.
pub fn ks_statistic(a: &Digest, b: &Digest, num_samples: usize) -> f64 {
    if a.is_empty() || b.is_empty() {
        return f64::NAN;
    }
    let lo = a.min().min(b.min());
    let hi = a.max().max(b.max());
    ks_statistic_in_range(a, b, lo, hi, num_samples)
}

/// Like [`ks_statistic`], restricted to the open interval `(lo, hi)`.
///
/// The endpoints are excluded. A degenerate interval yields `0`.
pub fn ks_statistic_in_range(
    a: &Digest,
    b: &Digest,
    lo: f64,
    hi: f64,
    num_samples: usize,
) -> f64 {
    if a.is_empty() || b.is_empty() || lo.is_nan() || hi.is_nan() {
        return f64::NAN;
    }
    if num_samples == 0 || hi <= lo {
        return 0.0;
    }

    let a = a.compacted();
    let b = b.compacted();
    let step = (hi - lo) / (num_samples + 1) as f64;
    (1..=num_samples)
        .map(|i| {
            let x = lo + step * i as f64;
            (a.cdf(x) - b.cdf(x)).abs()
        })
        .fold(0.0, f64::max)
}

/// `sqrt(-0.5 * ln(alpha / 2) * a * b / (a + b))`.
///
/// Strictly decreasing in `alpha`, symmetric in the counts and strictly
/// increasing in either count.
pub fn ks_threshold(alpha: f64, a_count: i64, b_count: i64) -> f64 {
    let a = a_count as f64;
    let b = b_count as f64;
    // Both products commute, so swapping the counts is bit-exact.
    let n = a * b / (a + b);
    (-0.5 * (alpha / 2.0).ln() * n).sqrt()
}

/// Classic critical distance `c(alpha) * sqrt((a + b) / (a * b))`.
///
/// Expressed through [`ks_threshold`]: the two multiply to
/// `-0.5 * ln(alpha / 2)`.
pub fn ks_critical_value(alpha: f64, a_count: i64, b_count: i64) -> f64 {
    -0.5 * (alpha / 2.0).ln() / ks_threshold(alpha, a_count, b_count)
}

/// `true` when the statistic exceeds [`ks_threshold`]. NaN compares false.
pub fn ks_test(a: &Digest, b: &Digest, alpha: f64, num_samples: usize) -> bool {
    ks_statistic(a, b, num_samples) > ks_threshold(alpha, a.count(), b.count())
}
