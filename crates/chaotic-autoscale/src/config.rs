//! Autoscaler tuning options.
//!
//! Every field has a default, so an empty TOML table (or no file at all)
//! yields the stock controller:
//!
//! ```toml
//! compression = 100.0
//! inter_experiment_sleep_ms = 1000
//! post_enactment_sleep_ms = 1000
//! max_inter_experiment_sleep_ms = 32000
//! alpha = 0.05
//! ks_samples = 10
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chaotic_tdigest::{DEFAULT_COMPRESSION, DEFAULT_KS_SAMPLES};

/// Rejected option values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("compression must be positive and finite, got {0}")]
    Compression(f64),

    #[error("alpha must lie strictly between 0 and 1, got {0}")]
    Alpha(f64),

    #[error("ks_samples must be at least 1")]
    KsSamples,

    #[error("{0} must be non-zero")]
    ZeroSleep(&'static str),

    #[error("max_inter_experiment_sleep_ms ({max}) is below inter_experiment_sleep_ms ({base})")]
    SleepCap { base: u64, max: u64 },
}

/// Construction-time options for [`crate::AutoScaler`] and
/// [`crate::LatencyTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Digest compression for recorded latencies.
    pub compression: f64,
    /// Baseline cooldown between experiments, in milliseconds.
    pub inter_experiment_sleep_ms: u64,
    /// Warm-up after changing the connection count, in milliseconds.
    pub post_enactment_sleep_ms: u64,
    /// Ceiling for the doubled cooldown, in milliseconds.
    pub max_inter_experiment_sleep_ms: u64,
    /// False-positive rate of the significance test.
    pub alpha: f64,
    /// CDF evaluation points per KS comparison.
    pub ks_samples: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            compression: DEFAULT_COMPRESSION,
            inter_experiment_sleep_ms: 1_000,
            post_enactment_sleep_ms: 1_000,
            max_inter_experiment_sleep_ms: 32_000,
            alpha: 0.05,
            ks_samples: DEFAULT_KS_SAMPLES,
        }
    }
}

impl Options {
    /// Load and validate options from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Options = toml::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.compression.is_finite() && self.compression > 0.0) {
            return Err(ConfigError::Compression(self.compression));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        if self.ks_samples == 0 {
            return Err(ConfigError::KsSamples);
        }
        if self.inter_experiment_sleep_ms == 0 {
            return Err(ConfigError::ZeroSleep("inter_experiment_sleep_ms"));
        }
        if self.post_enactment_sleep_ms == 0 {
            return Err(ConfigError::ZeroSleep("post_enactment_sleep_ms"));
        }
        if self.max_inter_experiment_sleep_ms < self.inter_experiment_sleep_ms {
            return Err(ConfigError::SleepCap {
                base: self.inter_experiment_sleep_ms,
                max: self.max_inter_experiment_sleep_ms,
            });
        }
        Ok(())
    }

    pub fn inter_experiment_sleep(&self) -> Duration {
        Duration::from_millis(self.inter_experiment_sleep_ms)
    }

    pub fn post_enactment_sleep(&self) -> Duration {
        Duration::from_millis(self.post_enactment_sleep_ms)
    }

    pub fn max_inter_experiment_sleep(&self) -> Duration {
        Duration::from_millis(self.max_inter_experiment_sleep_ms)
    }
}
