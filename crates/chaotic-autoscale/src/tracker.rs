//! Latency tracker — per-connection sample windows for Subject implementers.
//!
//! Transports record each finished request here and answer the
//! `measure_*` calls of [`crate::Subject`] from the current window.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::Options;
use crate::metrics::{ConnectionId, Metrics};

/// Thread-safe window of client/server latencies, keyed by connection.
pub struct LatencyTracker {
    compression: f64,
    window: Mutex<HashMap<ConnectionId, Metrics>>,
}

impl LatencyTracker {
    pub fn new(compression: f64) -> Self {
        Self {
            compression,
            window: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_options(options: &Options) -> Self {
        Self::new(options.compression)
    }

    /// Record one request's latencies, in milliseconds.
    pub fn record(&self, id: ConnectionId, client_ms: f64, server_ms: f64) {
        let mut window = self.window.lock();
        window
            .entry(id)
            .or_insert_with(|| Metrics::with_compression(self.compression))
            .record(client_ms, server_ms);
    }

    /// All connections merged into one snapshot.
    pub fn overall(&self) -> Metrics {
        let window = self.window.lock();
        let mut total = Metrics::with_compression(self.compression);
        for metrics in window.values() {
            total.merge(metrics);
        }
        total
    }

    pub fn per_connection(&self) -> HashMap<ConnectionId, Metrics> {
        self.window.lock().clone()
    }

    /// Hand out the current window and start a fresh one.
    pub fn take_window(&self) -> HashMap<ConnectionId, Metrics> {
        let taken = std::mem::take(&mut *self.window.lock());
        debug!(connections = taken.len(), "latency window rotated");
        taken
    }

    /// Drop the samples of a removed connection.
    pub fn forget(&self, id: ConnectionId) {
        if self.window.lock().remove(&id).is_some() {
            debug!(connection = %id, "forgot connection latencies");
        }
    }

    /// Server-side samples across all connections.
    pub fn sample_count(&self) -> i64 {
        self.window.lock().values().map(Metrics::sample_count).sum()
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::from_options(&Options::default())
    }
}
