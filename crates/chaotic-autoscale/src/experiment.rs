//! Experiment directions, verdicts and hysteresis state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of the next scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Experiment {
    /// Add a connection.
    Up,
    /// Park, then remove, the connection with the worst tail latency.
    Down,
}

impl Experiment {
    /// The opposite direction.
    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Experiment::Up => Experiment::Down,
            Experiment::Down => Experiment::Up,
        }
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Experiment::Up => f.write_str("up"),
            Experiment::Down => f.write_str("down"),
        }
    }
}

/// Verdict of one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentResult {
    Success,
    Failure,
    Inconclusive,
}

impl ExperimentResult {
    /// Merge precedence: Failure over Inconclusive over Success.
    fn severity(self) -> u8 {
        match self {
            ExperimentResult::Success => 0,
            ExperimentResult::Inconclusive => 1,
            ExperimentResult::Failure => 2,
        }
    }
}

impl fmt::Display for ExperimentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentResult::Success => f.write_str("success"),
            ExperimentResult::Failure => f.write_str("failure"),
            ExperimentResult::Inconclusive => f.write_str("inconclusive"),
        }
    }
}

/// Combine two verdicts. Symmetric; only two successes merge to success.
pub fn merge_experiment_results(a: ExperimentResult, b: ExperimentResult) -> ExperimentResult {
    if a.severity() >= b.severity() { a } else { b }
}

/// Hysteresis state: did the loop just find a local optimum?
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum History {
    #[default]
    NoHistory,
    Success,
    /// A success followed by an inconclusive result: near the optimum.
    SuccessThenInconclusive,
}
