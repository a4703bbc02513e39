//! Turning before/after latency snapshots into a verdict.
//!
//! A band comparison looks at one quantile (the median or the 0.75 tail)
//! and at the slice of both distributions around it. The slice is tested
//! with a two-sample KS statistic restricted to the band's value span,
//! against the classic critical distance for the two sample counts. A
//! one-sided evaluation only reports success when both quantiles moved
//! down and at least one band moved significantly; failure is the mirror
//! image. Everything else is inconclusive, including NaN quantiles from
//! empty snapshots.

use std::collections::HashMap;

use chaotic_tdigest::{ks_critical_value, ks_statistic_in_range, Digest, DEFAULT_KS_SAMPLES};

use crate::config::Options;
use crate::experiment::{merge_experiment_results, ExperimentResult};
use crate::metrics::{ConnectionId, Metrics};

pub const MEDIAN: f64 = 0.5;
pub const MEDIAN_BAND: f64 = 0.25;
pub const TAIL: f64 = 0.75;
pub const TAIL_BAND: f64 = 0.2;

/// One quantile of both snapshots plus whether the band around it differs.
#[derive(Debug, Clone, Copy)]
struct Band {
    before: f64,
    after: f64,
    significant: bool,
}

impl Band {
    fn improved(&self) -> bool {
        self.after < self.before
    }

    fn regressed(&self) -> bool {
        self.after > self.before
    }
}

/// Significance settings for experiment evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluator {
    pub alpha: f64,
    pub num_samples: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            num_samples: DEFAULT_KS_SAMPLES,
        }
    }
}

impl Evaluator {
    pub fn from_options(options: &Options) -> Self {
        Self {
            alpha: options.alpha,
            num_samples: options.ks_samples,
        }
    }

    fn band(&self, before: &Digest, after: &Digest, quantile: f64, range: f64) -> Band {
        let before = before.compacted();
        let after = after.compacted();

        let lo_q = (quantile - range).max(0.0);
        let hi_q = (quantile + range).min(1.0);
        let lo = before.quantile(lo_q).min(after.quantile(lo_q));
        let hi = before.quantile(hi_q).max(after.quantile(hi_q));

        let statistic = ks_statistic_in_range(&before, &after, lo, hi, self.num_samples);
        let critical = ks_critical_value(self.alpha, before.count(), after.count());

        Band {
            before: before.quantile(quantile),
            after: after.quantile(quantile),
            significant: statistic > critical,
        }
    }

    /// Verdict for a single quantile band `[quantile - range, quantile + range]`.
    pub fn evaluate_quantile(
        &self,
        before: &Digest,
        after: &Digest,
        quantile: f64,
        range: f64,
    ) -> ExperimentResult {
        let band = self.band(before, after, quantile, range);
        if !band.significant {
            ExperimentResult::Inconclusive
        } else if band.improved() {
            ExperimentResult::Success
        } else if band.regressed() {
            ExperimentResult::Failure
        } else {
            ExperimentResult::Inconclusive
        }
    }

    /// Compare one latency dimension, lower is better.
    pub fn evaluate_one_sided(&self, before: &Digest, after: &Digest) -> ExperimentResult {
        let median = self.band(before, after, MEDIAN, MEDIAN_BAND);
        let tail = self.band(before, after, TAIL, TAIL_BAND);

        if !(median.significant || tail.significant) {
            return ExperimentResult::Inconclusive;
        }
        if median.improved() && tail.improved() {
            ExperimentResult::Success
        } else if median.regressed() && tail.regressed() {
            ExperimentResult::Failure
        } else {
            ExperimentResult::Inconclusive
        }
    }

    /// Client and server verdicts merged: both must agree it helped.
    pub fn evaluate_experiment(&self, before: &Metrics, after: &Metrics) -> ExperimentResult {
        merge_experiment_results(
            self.evaluate_one_sided(&before.client_latency, &after.client_latency),
            self.evaluate_one_sided(&before.server_latency, &after.server_latency),
        )
    }
}

/// [`Evaluator::evaluate_one_sided`] with default settings.
pub fn evaluate_one_sided_experiment(before: &Digest, after: &Digest) -> ExperimentResult {
    Evaluator::default().evaluate_one_sided(before, after)
}

/// [`Evaluator::evaluate_experiment`] with default settings.
pub fn evaluate_experiment(before: &Metrics, after: &Metrics) -> ExperimentResult {
    Evaluator::default().evaluate_experiment(before, after)
}

/// The connection whose server-side 0.75 quantile is highest.
///
/// Empty snapshots (NaN tails) rank lowest and ties go to the smallest id,
/// so the answer is deterministic and always a key of `latencies`.
pub fn choose_worst_tail_latency(latencies: &HashMap<ConnectionId, Metrics>) -> Option<ConnectionId> {
    let tail = |metrics: &Metrics| {
        let t = metrics.server_latency.quantile(TAIL);
        if t.is_nan() { f64::NEG_INFINITY } else { t }
    };
    latencies
        .iter()
        .map(|(id, metrics)| (*id, tail(metrics)))
        .max_by(|(id_a, a), (id_b, b)| a.total_cmp(b).then_with(|| id_b.cmp(id_a)))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{QuickCheck, TestResult};

    fn digest_of(values: impl IntoIterator<Item = f64>) -> Digest {
        let mut digest = Digest::new(100.0);
        for v in values {
            digest.add_one(v);
        }
        digest
    }

    fn spread(lo: f64, hi: f64, n: usize) -> Digest {
        digest_of((0..n).map(|i| lo + (hi - lo) * i as f64 / n as f64))
    }

    fn metrics(client: Digest, server: Digest) -> Metrics {
        Metrics {
            client_latency: client,
            server_latency: server,
        }
    }

    #[test]
    fn clear_improvement_is_success() {
        let before = spread(10.0, 20.0, 500);
        let after = spread(1.0, 2.0, 500);
        assert_eq!(evaluate_one_sided_experiment(&before, &after), ExperimentResult::Success);
    }

    #[test]
    fn clear_regression_is_failure() {
        let before = spread(1.0, 2.0, 500);
        let after = spread(10.0, 20.0, 500);
        assert_eq!(evaluate_one_sided_experiment(&before, &after), ExperimentResult::Failure);
    }

    #[test]
    fn same_distribution_is_inconclusive() {
        let before = spread(5.0, 10.0, 500);
        let after = spread(5.0, 10.0, 400);
        assert_eq!(
            evaluate_one_sided_experiment(&before, &after),
            ExperimentResult::Inconclusive
        );
    }

    #[test]
    fn tiny_shift_is_inconclusive() {
        let before = spread(100.0, 200.0, 200);
        let after = spread(99.5, 199.5, 200);
        assert_eq!(
            evaluate_one_sided_experiment(&before, &after),
            ExperimentResult::Inconclusive
        );
    }

    #[test]
    fn mixed_movement_is_inconclusive() {
        // Median drops, tail grows.
        let before = spread(10.0, 20.0, 1000);
        let mut after = spread(5.0, 10.0, 700);
        after.merge(&spread(40.0, 50.0, 300));
        assert_eq!(
            evaluate_one_sided_experiment(&before, &after),
            ExperimentResult::Inconclusive
        );
    }

    #[test]
    fn empty_snapshots_are_inconclusive() {
        let empty = Digest::new(100.0);
        let full = spread(1.0, 2.0, 100);
        assert_eq!(evaluate_one_sided_experiment(&empty, &full), ExperimentResult::Inconclusive);
        assert_eq!(evaluate_one_sided_experiment(&full, &empty), ExperimentResult::Inconclusive);
        assert_eq!(evaluate_one_sided_experiment(&empty, &empty), ExperimentResult::Inconclusive);
    }

    #[test]
    fn evaluate_quantile_single_band() {
        let evaluator = Evaluator::default();
        let before = spread(10.0, 20.0, 500);
        let after = spread(1.0, 2.0, 500);
        assert_eq!(
            evaluator.evaluate_quantile(&before, &after, MEDIAN, MEDIAN_BAND),
            ExperimentResult::Success
        );
        assert_eq!(
            evaluator.evaluate_quantile(&after, &before, TAIL, TAIL_BAND),
            ExperimentResult::Failure
        );
        assert_eq!(
            evaluator.evaluate_quantile(&before, &before.clone(), TAIL, TAIL_BAND),
            ExperimentResult::Inconclusive
        );
    }

    #[test]
    fn experiment_needs_both_dimensions() {
        let low = spread(1.0, 2.0, 500);
        let medium = spread(10.0, 20.0, 500);
        let high = spread(100.0, 200.0, 500);

        let before = metrics(medium.clone(), medium.clone());
        assert_eq!(
            evaluate_experiment(&before, &metrics(low.clone(), low.clone())),
            ExperimentResult::Success
        );
        assert_eq!(
            evaluate_experiment(&before, &metrics(low.clone(), medium.clone())),
            ExperimentResult::Inconclusive
        );
        assert_eq!(
            evaluate_experiment(&before, &metrics(low, high.clone())),
            ExperimentResult::Failure
        );
        assert_eq!(
            evaluate_experiment(&before, &metrics(high.clone(), high)),
            ExperimentResult::Failure
        );
    }

    #[test]
    fn one_sided_sign_constraints() {
        fn inner(a: Vec<f64>, b: Vec<f64>, scale: u8) -> TestResult {
            let shift = scale as f64 / 10.0;
            let a = digest_of(a.into_iter().map(|v| v % 1e6));
            let b = digest_of(b.into_iter().map(|v| v % 1e6 + shift));

            let median_better = b.quantile(MEDIAN) < a.quantile(MEDIAN);
            let tail_better = b.quantile(TAIL) < a.quantile(TAIL);
            let result = evaluate_one_sided_experiment(&a, &b);

            if median_better && result == ExperimentResult::Failure {
                return TestResult::error("median improved but verdict is failure");
            }
            if tail_better && result == ExperimentResult::Failure {
                return TestResult::error("tail improved but verdict is failure");
            }
            if !median_better && result == ExperimentResult::Success {
                return TestResult::error("median did not improve but verdict is success");
            }
            if !tail_better && result == ExperimentResult::Success {
                return TestResult::error("tail did not improve but verdict is success");
            }
            TestResult::passed()
        }

        QuickCheck::new()
            .tests(2000)
            .quickcheck(inner as fn(Vec<f64>, Vec<f64>, u8) -> TestResult);
    }

    #[test]
    fn choose_worst_picks_highest_tail() {
        let mut latencies = HashMap::new();
        latencies.insert(ConnectionId(1), metrics(spread(1.0, 2.0, 50), spread(1.0, 2.0, 50)));
        latencies.insert(ConnectionId(2), metrics(spread(1.0, 2.0, 50), spread(5.0, 9.0, 50)));
        latencies.insert(ConnectionId(3), Metrics::new());
        assert_eq!(choose_worst_tail_latency(&latencies), Some(ConnectionId(2)));
    }

    #[test]
    fn choose_worst_is_deterministic_on_ties() {
        let mut latencies = HashMap::new();
        for id in [9, 4, 6] {
            latencies.insert(ConnectionId(id), Metrics::new());
        }
        assert_eq!(choose_worst_tail_latency(&latencies), Some(ConnectionId(4)));
        assert_eq!(choose_worst_tail_latency(&HashMap::new()), None);
    }

    #[test]
    fn choose_worst_returns_a_key() {
        fn inner(entries: Vec<(u16, Vec<f64>)>) -> TestResult {
            if entries.is_empty() {
                return TestResult::discard();
            }
            let mut latencies = HashMap::new();
            for (id, values) in entries {
                let server = digest_of(values);
                latencies.insert(ConnectionId(id as u64), metrics(Digest::new(100.0), server));
            }
            match choose_worst_tail_latency(&latencies) {
                Some(id) if latencies.contains_key(&id) => TestResult::passed(),
                other => TestResult::error(format!("returned {other:?}")),
            }
        }

        QuickCheck::new().quickcheck(inner as fn(Vec<(u16, Vec<f64>)>) -> TestResult);
    }
}
