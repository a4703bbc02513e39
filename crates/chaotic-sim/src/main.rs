//! chaotic-sim — run the connection autoscaler against a synthetic link.
//!
//! The link's latency is lowest at `--optimal` active connections, so a
//! healthy controller drifts towards that count and then hovers around it.
//!
//! # Usage
//!
//! ```text
//! chaotic-sim --optimal 6 --cycles 50 --seed 42
//! chaotic-sim --config autoscale.toml --json
//! ```

mod link;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use chaotic_autoscale::{AutoScaler, AutoScalerStatus, ExperimentResult, Options, Subject};

use crate::link::{mean_latency_ms, SimulatedLink};

#[derive(Parser)]
#[command(name = "chaotic-sim", about = "Drive the chaotic-good autoscaler against a simulated link")]
struct Cli {
    /// Autoscaler options (TOML). Without it the simulator uses
    /// millisecond-scale sleeps so a run finishes quickly.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Connection count with the lowest latency.
    #[arg(long, default_value = "4")]
    optimal: usize,

    /// Connections open at start.
    #[arg(long, default_value = "1")]
    initial: usize,

    /// Number of experiment cycles to run.
    #[arg(long, default_value = "40")]
    cycles: usize,

    /// Requests simulated per measurement window.
    #[arg(long, default_value = "2000")]
    samples: usize,

    /// Seed for the latency model.
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Serialize)]
struct Tally {
    success: usize,
    failure: usize,
    inconclusive: usize,
    skipped: usize,
}

impl Tally {
    fn count(&mut self, result: Option<ExperimentResult>) {
        match result {
            Some(ExperimentResult::Success) => self.success += 1,
            Some(ExperimentResult::Failure) => self.failure += 1,
            Some(ExperimentResult::Inconclusive) => self.inconclusive += 1,
            None => self.skipped += 1,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    cycles: usize,
    optimal: usize,
    parked: usize,
    mean_latency_ms: f64,
    results: Tally,
    status: AutoScalerStatus,
}

fn simulator_options() -> Options {
    Options {
        inter_experiment_sleep_ms: 10,
        post_enactment_sleep_ms: 10,
        max_inter_experiment_sleep_ms: 320,
        ..Default::default()
    }
}

/// Run up to `cycles` experiments with their cooldowns in between,
/// stopping as soon as `interrupt` resolves.
async fn drive<S: Subject>(
    scaler: &mut AutoScaler<S>,
    cycles: usize,
    interrupt: impl Future<Output = ()>,
) -> (usize, Tally) {
    tokio::pin!(interrupt);
    let mut tally = Tally::default();
    let mut done = 0;
    while done < cycles {
        let interrupted = tokio::select! {
            _ = async {
                tally.count(scaler.step().await);
                done += 1;
                if done < cycles {
                    tokio::time::sleep(scaler.inter_experiment_sleep()).await;
                }
            } => false,
            _ = &mut interrupt => true,
        };
        if interrupted {
            warn!(cycles = done, "interrupted");
            break;
        }
    }
    (done, tally)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chaotic=debug")),
        )
        .init();

    let cli = Cli::parse();

    let options = match &cli.config {
        Some(path) => Options::from_file(path)?,
        None => simulator_options(),
    };
    options.validate()?;

    let link = Arc::new(SimulatedLink::new(
        &options,
        cli.initial,
        cli.optimal,
        cli.samples,
        cli.seed,
    ));
    let mut scaler = AutoScaler::new(Arc::clone(&link), options);

    info!(
        optimal = cli.optimal,
        initial = cli.initial,
        cycles = cli.cycles,
        seed = cli.seed,
        "simulation starting"
    );

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let (cycles, tally) = drive(&mut scaler, cli.cycles, ctrl_c).await;

    let status = scaler.status();
    let report = Report {
        cycles,
        optimal: link.optimal(),
        parked: link.parked(),
        mean_latency_ms: mean_latency_ms(status.connections, link.optimal()),
        results: tally,
        status,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("cycles:        {}", report.cycles);
        println!(
            "connections:   {} active, {} parked (optimum {})",
            report.status.connections, report.parked, report.optimal
        );
        println!("mean latency:  {:.2} ms", report.mean_latency_ms);
        println!(
            "results:       {} success, {} failure, {} inconclusive, {} skipped",
            report.results.success,
            report.results.failure,
            report.results.inconclusive,
            report.results.skipped
        );
        println!(
            "next:          {} ({:?}, cooldown {} ms)",
            report.status.next_experiment,
            report.status.history,
            report.status.inter_experiment_sleep_ms
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, Instant};

    fn slow_cooldown() -> Options {
        Options {
            inter_experiment_sleep_ms: 10_000,
            post_enactment_sleep_ms: 10,
            max_inter_experiment_sleep_ms: 40_000,
            ..Default::default()
        }
    }

    fn scaler(options: Options) -> AutoScaler<Arc<SimulatedLink>> {
        let link = Arc::new(SimulatedLink::new(&options, 2, 4, 200, 5));
        AutoScaler::new(link, options)
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_cooldown_stops_promptly() {
        let mut scaler = scaler(slow_cooldown());
        let start = Instant::now();

        let (done, tally) =
            drive(&mut scaler, 5, tokio::time::sleep(Duration::from_millis(500))).await;

        assert_eq!(done, 1);
        assert_eq!(tally.success + tally.failure + tally.inconclusive + tally.skipped, 1);
        assert!(start.elapsed() < Duration::from_secs(1), "waited {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_every_cycle_without_interrupt() {
        let mut scaler = scaler(simulator_options());
        let (done, tally) = drive(&mut scaler, 3, std::future::pending()).await;
        assert_eq!(done, 3);
        assert_eq!(tally.success + tally.failure + tally.inconclusive + tally.skipped, 3);
    }
}
