//! chaotic-autoscale — experiment-driven connection count control.
//!
//! Tunes how many parallel connections a link uses by running one
//! experiment at a time: measure latency, add or park a connection, wait,
//! measure again, and keep or revert the change depending on whether a
//! two-sample KS comparison says latency improved.
//!
//! # Control Loop
//!
//! ```text
//! before = measure_overall_latency()
//! Up:   id = add_connection()
//! Down: id = worst server tail of measure_per_connection_latency(); park(id)
//! sleep(post_enactment_sleep)
//! after  = measure_overall_latency()
//! result = evaluate_experiment(before, after)
//!
//! Up   + Failure              -> remove(id)
//! Down + Failure              -> unpark(id)
//! Down + Success/Inconclusive -> remove(id)
//!
//! Success  -> keep direction, cooldown back to baseline
//! Failure  -> reverse direction, double cooldown (capped)
//! sleep(inter_experiment_sleep)
//! ```
//!
//! # Components
//!
//! - **`config`** — [`Options`] loaded from TOML
//! - **`metrics`** — [`Metrics`] client/server digests, [`ConnectionId`]
//! - **`experiment`** — directions, verdicts, history
//! - **`evaluate`** — KS-backed verdicts and worst-connection choice
//! - **`subject`** — the [`Subject`] trait transports implement
//! - **`scaler`** — the [`AutoScaler`] loop
//! - **`tracker`** — [`LatencyTracker`] for recording samples

pub mod config;
pub mod evaluate;
pub mod experiment;
pub mod metrics;
pub mod scaler;
pub mod subject;
pub mod tracker;

pub use config::{ConfigError, Options};
pub use evaluate::{
    choose_worst_tail_latency, evaluate_experiment, evaluate_one_sided_experiment, Evaluator,
};
pub use experiment::{merge_experiment_results, Experiment, ExperimentResult, History};
pub use metrics::{ConnectionId, Metrics};
pub use scaler::{ActiveExperiment, AutoScaler, AutoScalerStatus};
pub use subject::{BoxFuture, Subject};
pub use tracker::LatencyTracker;
