//! AutoScaler — experiment-driven connection count control.
//!
//! Each cycle measures overall latency, perturbs the connection count by
//! one, waits for traffic to settle, measures again and keeps or reverts
//! the change depending on the verdict. Successes keep the direction and
//! the fast cadence; failures flip the direction and back off.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::evaluate::{choose_worst_tail_latency, Evaluator};
use crate::experiment::{Experiment, ExperimentResult, History};
use crate::metrics::{ConnectionId, Metrics};
use crate::subject::Subject;

/// The experiment currently in flight.
#[derive(Debug, Clone)]
pub struct ActiveExperiment {
    pub experiment: Experiment,
    pub latency_before: Metrics,
    /// The added connection for `Up`, the parked one for `Down`.
    pub affected_connection: ConnectionId,
}

/// Point-in-time view of the controller, for logs and status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoScalerStatus {
    pub next_experiment: Experiment,
    pub history: History,
    pub inter_experiment_sleep_ms: u64,
    pub post_enactment_sleep_ms: u64,
    pub active_experiment: Option<Experiment>,
    pub affected_connection: Option<ConnectionId>,
    pub connections: usize,
}

/// Tunes the number of connections of one [`Subject`].
pub struct AutoScaler<S> {
    subject: S,
    options: Options,
    evaluator: Evaluator,
    history: History,
    next_experiment: Experiment,
    inter_experiment_sleep: Duration,
    post_enactment_sleep: Duration,
    active_experiment: Option<ActiveExperiment>,
}

impl<S: Subject> AutoScaler<S> {
    pub fn new(subject: S, options: Options) -> Self {
        Self {
            subject,
            evaluator: Evaluator::from_options(&options),
            history: History::NoHistory,
            next_experiment: Experiment::Up,
            inter_experiment_sleep: options.inter_experiment_sleep(),
            post_enactment_sleep: options.post_enactment_sleep(),
            active_experiment: None,
            options,
        }
    }

    /// Run one experiment cycle, without the trailing cooldown.
    ///
    /// Returns `None` when the cycle was skipped: a downscale with at most
    /// one connection left (the direction flips to `Up`), or a downscale
    /// with no per-connection latency to pick a candidate from.
    pub async fn step(&mut self) -> Option<ExperimentResult> {
        if let Some(stale) = self.active_experiment.take() {
            warn!(
                experiment = %stale.experiment,
                connection = %stale.affected_connection,
                "discarding abandoned experiment, its change stays in place"
            );
        }

        let experiment = self.next_experiment;
        if experiment == Experiment::Down {
            let connections = self.subject.num_connections();
            if connections <= 1 {
                warn!(connections, "refusing to park the last connection, switching to upscale");
                self.next_experiment = Experiment::Up;
                return None;
            }
        }

        let before = self.subject.measure_overall_latency().await;

        let affected = match experiment {
            Experiment::Up => self.subject.add_connection().await,
            Experiment::Down => {
                let per_connection = self.subject.measure_per_connection_latency().await;
                let Some(worst) = choose_worst_tail_latency(&per_connection) else {
                    debug!("no per-connection latency, skipping downscale");
                    return None;
                };
                self.subject.park_connection(worst).await;
                worst
            }
        };
        debug!(%experiment, connection = %affected, "experiment enacted");

        self.active_experiment = Some(ActiveExperiment {
            experiment,
            latency_before: before.clone(),
            affected_connection: affected,
        });

        tokio::time::sleep(self.post_enactment_sleep).await;

        let after = self.subject.measure_overall_latency().await;
        let result = self.evaluator.evaluate_experiment(&before, &after);

        match (experiment, result) {
            (Experiment::Up, ExperimentResult::Failure) => {
                self.subject.remove_connection(affected).await;
            }
            (Experiment::Up, _) => {}
            (Experiment::Down, ExperimentResult::Failure) => {
                self.subject.unpark_connection(affected).await;
            }
            (Experiment::Down, _) => {
                self.subject.remove_connection(affected).await;
            }
        }
        info!(
            %experiment,
            %result,
            connection = %affected,
            connections = self.subject.num_connections(),
            "experiment finished"
        );

        self.finish_experiment(result);
        Some(result)
    }

    /// Fold a verdict into direction, cadence and history.
    pub fn finish_experiment(&mut self, result: ExperimentResult) {
        match result {
            ExperimentResult::Success => {
                self.inter_experiment_sleep = self.options.inter_experiment_sleep();
                self.history = History::Success;
            }
            ExperimentResult::Failure => {
                self.next_experiment = self.next_experiment.reverse();
                self.back_off();
                self.history = History::NoHistory;
            }
            ExperimentResult::Inconclusive => match self.history {
                History::Success => self.history = History::SuccessThenInconclusive,
                // Parked near the optimum: experiment less often.
                History::SuccessThenInconclusive => self.back_off(),
                History::NoHistory => {}
            },
        }
        self.active_experiment = None;
        debug!(
            next = %self.next_experiment,
            history = ?self.history,
            sleep_ms = self.inter_experiment_sleep.as_millis() as u64,
            "controller updated"
        );
    }

    fn back_off(&mut self) {
        self.inter_experiment_sleep = self
            .inter_experiment_sleep
            .saturating_mul(2)
            .min(self.options.max_inter_experiment_sleep());
    }

    async fn cycle(&mut self) {
        self.step().await;
        tokio::time::sleep(self.inter_experiment_sleep).await;
    }

    /// Run experiments forever. Drop the future to stop.
    pub async fn run(&mut self) {
        info!(
            connections = self.subject.num_connections(),
            next = %self.next_experiment,
            "autoscaler started"
        );
        loop {
            self.cycle().await;
        }
    }

    /// Run experiments until `shutdown` changes.
    ///
    /// A cycle interrupted by shutdown leaves its enacted change in place.
    pub async fn run_until_shutdown(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            connections = self.subject.num_connections(),
            next = %self.next_experiment,
            "autoscaler started"
        );
        loop {
            tokio::select! {
                _ = self.cycle() => {}
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }

    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn history(&self) -> History {
        self.history
    }

    pub fn next_experiment(&self) -> Experiment {
        self.next_experiment
    }

    pub fn inter_experiment_sleep(&self) -> Duration {
        self.inter_experiment_sleep
    }

    pub fn post_enactment_sleep(&self) -> Duration {
        self.post_enactment_sleep
    }

    /// The experiment in flight, or one abandoned by a dropped cycle.
    pub fn active_experiment(&self) -> Option<&ActiveExperiment> {
        self.active_experiment.as_ref()
    }

    pub fn status(&self) -> AutoScalerStatus {
        AutoScalerStatus {
            next_experiment: self.next_experiment,
            history: self.history,
            inter_experiment_sleep_ms: self.inter_experiment_sleep.as_millis() as u64,
            post_enactment_sleep_ms: self.post_enactment_sleep.as_millis() as u64,
            active_experiment: self.active_experiment.as_ref().map(|a| a.experiment),
            affected_connection: self.active_experiment.as_ref().map(|a| a.affected_connection),
            connections: self.subject.num_connections(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::subject::BoxFuture;

    /// A subject that is never driven; only bookkeeping is tested here.
    struct Idle;

    impl Subject for Idle {
        fn add_connection(&self) -> BoxFuture<'_, ConnectionId> {
            Box::pin(async { ConnectionId(0) })
        }
        fn remove_connection(&self, _id: ConnectionId) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn park_connection(&self, _id: ConnectionId) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn unpark_connection(&self, _id: ConnectionId) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn measure_overall_latency(&self) -> BoxFuture<'_, Metrics> {
            Box::pin(async { Metrics::new() })
        }
        fn measure_per_connection_latency(&self) -> BoxFuture<'_, HashMap<ConnectionId, Metrics>> {
            Box::pin(async { HashMap::new() })
        }
        fn num_connections(&self) -> usize {
            1
        }
    }

    fn scaler() -> AutoScaler<Idle> {
        AutoScaler::new(Idle, Options::default())
    }

    #[test]
    fn starts_upward_with_baseline_sleeps() {
        let scaler = scaler();
        assert_eq!(scaler.next_experiment(), Experiment::Up);
        assert_eq!(scaler.history(), History::NoHistory);
        assert_eq!(scaler.inter_experiment_sleep(), Duration::from_secs(1));
        assert_eq!(scaler.post_enactment_sleep(), Duration::from_secs(1));
        assert!(scaler.active_experiment().is_none());
    }

    #[test]
    fn failure_reverses_and_backs_off_to_cap() {
        let mut scaler = scaler();
        let mut expected = Experiment::Up;
        for secs in [2, 4, 8, 16, 32, 32, 32] {
            scaler.finish_experiment(ExperimentResult::Failure);
            expected = expected.reverse();
            assert_eq!(scaler.next_experiment(), expected);
            assert_eq!(scaler.inter_experiment_sleep(), Duration::from_secs(secs));
            assert_eq!(scaler.history(), History::NoHistory);
        }
    }

    #[test]
    fn success_resets_cadence_and_keeps_direction() {
        let mut scaler = scaler();
        scaler.finish_experiment(ExperimentResult::Failure);
        scaler.finish_experiment(ExperimentResult::Failure);
        scaler.finish_experiment(ExperimentResult::Failure);
        assert_eq!(scaler.next_experiment(), Experiment::Down);

        scaler.finish_experiment(ExperimentResult::Success);
        assert_eq!(scaler.next_experiment(), Experiment::Down);
        assert_eq!(scaler.inter_experiment_sleep(), Duration::from_secs(1));
        assert_eq!(scaler.history(), History::Success);
    }

    #[test]
    fn inconclusive_after_success_slows_down() {
        let mut scaler = scaler();
        scaler.finish_experiment(ExperimentResult::Inconclusive);
        assert_eq!(scaler.history(), History::NoHistory);
        assert_eq!(scaler.inter_experiment_sleep(), Duration::from_secs(1));

        scaler.finish_experiment(ExperimentResult::Success);
        scaler.finish_experiment(ExperimentResult::Inconclusive);
        assert_eq!(scaler.history(), History::SuccessThenInconclusive);
        assert_eq!(scaler.inter_experiment_sleep(), Duration::from_secs(1));

        for secs in [2, 4, 8, 16, 32, 32] {
            scaler.finish_experiment(ExperimentResult::Inconclusive);
            assert_eq!(scaler.history(), History::SuccessThenInconclusive);
            assert_eq!(scaler.inter_experiment_sleep(), Duration::from_secs(secs));
        }
        assert_eq!(scaler.next_experiment(), Experiment::Up);
    }

    #[test]
    fn finish_clears_active_experiment() {
        let mut scaler = scaler();
        scaler.active_experiment = Some(ActiveExperiment {
            experiment: Experiment::Up,
            latency_before: Metrics::new(),
            affected_connection: ConnectionId(3),
        });
        assert_eq!(scaler.status().affected_connection, Some(ConnectionId(3)));
        scaler.finish_experiment(ExperimentResult::Inconclusive);
        assert!(scaler.active_experiment().is_none());
    }

    #[test]
    fn custom_cap_is_respected() {
        let options = Options {
            inter_experiment_sleep_ms: 500,
            max_inter_experiment_sleep_ms: 1_500,
            ..Default::default()
        };
        let mut scaler = AutoScaler::new(Idle, options);
        for _ in 0..4 {
            scaler.finish_experiment(ExperimentResult::Failure);
        }
        assert_eq!(scaler.inter_experiment_sleep(), Duration::from_millis(1_500));
        scaler.finish_experiment(ExperimentResult::Success);
        assert_eq!(scaler.inter_experiment_sleep(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn last_connection_is_never_parked() {
        let mut scaler = scaler();
        scaler.finish_experiment(ExperimentResult::Failure);
        assert_eq!(scaler.next_experiment(), Experiment::Down);
        assert_eq!(scaler.step().await, None);
        assert_eq!(scaler.next_experiment(), Experiment::Up);
    }

    #[test]
    fn status_serializes() {
        let status = scaler().status();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["next_experiment"], "up");
        assert_eq!(json["history"], "no_history");
        assert_eq!(json["inter_experiment_sleep_ms"], 1000);
        assert_eq!(json["connections"], 1);
        assert!(json["active_experiment"].is_null());
    }
}
