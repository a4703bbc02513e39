//! Latency snapshots and connection identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use chaotic_tdigest::{Digest, DEFAULT_COMPRESSION};

/// Opaque identifier the Subject hands out for each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One latency snapshot, either across the whole link or for a single
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub client_latency: Digest,
    pub server_latency: Digest,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::with_compression(DEFAULT_COMPRESSION)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(compression: f64) -> Self {
        Self {
            client_latency: Digest::new(compression),
            server_latency: Digest::new(compression),
        }
    }

    /// Record one request's client- and server-observed latency.
    pub fn record(&mut self, client: f64, server: f64) {
        self.client_latency.add_one(client);
        self.server_latency.add_one(server);
    }

    pub fn merge(&mut self, other: &Metrics) {
        self.client_latency.merge(&other.client_latency);
        self.server_latency.merge(&other.server_latency);
    }

    /// Run pending merge passes so later queries borrow instead of cloning.
    pub fn flush(&mut self) {
        self.client_latency.flush();
        self.server_latency.flush();
    }

    /// Number of server-side samples in the snapshot.
    pub fn sample_count(&self) -> i64 {
        self.server_latency.count()
    }
}
