//! Synthetic link — latency is U-shaped in the number of active connections.
//!
//! Too few connections queue requests behind each other; too many split
//! the traffic so thinly that per-connection overhead dominates. Each
//! connection also carries a fixed slowness factor so that downscales
//! have a meaningful "worst" candidate.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use chaotic_autoscale::{BoxFuture, ConnectionId, LatencyTracker, Metrics, Options, Subject};

/// Latency floor of a perfectly sized link, in milliseconds.
const BASE_LATENCY_MS: f64 = 10.0;

/// Server share of the client-observed latency.
const SERVER_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Connection {
    slowness: f64,
    parked: bool,
}

struct LinkState {
    rng: StdRng,
    next_id: u64,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl LinkState {
    fn active(&self) -> Vec<(ConnectionId, f64)> {
        self.connections
            .iter()
            .filter(|(_, c)| !c.parked)
            .map(|(id, c)| (*id, c.slowness))
            .collect()
    }
}

/// Mean latency for `active` connections on a link whose sweet spot is
/// `optimal`.
pub fn mean_latency_ms(active: usize, optimal: usize) -> f64 {
    let optimal = optimal.max(1) as f64;
    let skew = (active as f64 - optimal) / optimal;
    BASE_LATENCY_MS * (1.0 + 4.0 * skew * skew)
}

/// A [`Subject`] backed by a random latency model.
pub struct SimulatedLink {
    optimal: usize,
    samples: usize,
    compression: f64,
    tracker: LatencyTracker,
    state: Mutex<LinkState>,
}

impl SimulatedLink {
    pub fn new(options: &Options, initial: usize, optimal: usize, samples: usize, seed: u64) -> Self {
        let mut state = LinkState {
            rng: StdRng::seed_from_u64(seed),
            next_id: 0,
            connections: BTreeMap::new(),
        };
        for _ in 0..initial {
            open(&mut state);
        }
        Self {
            optimal,
            samples,
            compression: options.compression,
            tracker: LatencyTracker::from_options(options),
            state: Mutex::new(state),
        }
    }

    pub fn optimal(&self) -> usize {
        self.optimal
    }

    pub fn parked(&self) -> usize {
        self.state.lock().connections.values().filter(|c| c.parked).count()
    }

    /// Push one window of traffic through the active connections.
    fn simulate_window(&self) {
        let mut state = self.state.lock();
        let active = state.active();
        if active.is_empty() {
            return;
        }
        let mean = mean_latency_ms(active.len(), self.optimal);
        for i in 0..self.samples {
            let (id, slowness) = active[i % active.len()];
            let u: f64 = state.rng.random();
            let client = mean * slowness * (0.5 - 0.5 * (1.0 - u).ln());
            let server = client * SERVER_SHARE;
            self.tracker.record(id, client, server);
        }
    }
}

fn open(state: &mut LinkState) -> ConnectionId {
    let id = ConnectionId(state.next_id);
    state.next_id += 1;
    let slowness = state.rng.random_range(1.0..1.5);
    state.connections.insert(id, Connection { slowness, parked: false });
    id
}

impl Subject for SimulatedLink {
    fn add_connection(&self) -> BoxFuture<'_, ConnectionId> {
        Box::pin(async move {
            let id = open(&mut self.state.lock());
            debug!(connection = %id, "connection opened");
            id
        })
    }

    fn remove_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().connections.remove(&id);
            self.tracker.forget(id);
            debug!(connection = %id, "connection closed");
        })
    }

    fn park_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(c) = self.state.lock().connections.get_mut(&id) {
                c.parked = true;
            }
        })
    }

    fn unpark_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(c) = self.state.lock().connections.get_mut(&id) {
                c.parked = false;
            }
        })
    }

    fn measure_overall_latency(&self) -> BoxFuture<'_, Metrics> {
        Box::pin(async move {
            self.simulate_window();
            let mut overall = Metrics::with_compression(self.compression);
            for metrics in self.tracker.take_window().values() {
                overall.merge(metrics);
            }
            overall
        })
    }

    fn measure_per_connection_latency(&self) -> BoxFuture<'_, HashMap<ConnectionId, Metrics>> {
        Box::pin(async move {
            self.simulate_window();
            self.tracker.take_window()
        })
    }

    fn num_connections(&self) -> usize {
        self.state.lock().active().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_is_lowest_at_optimum() {
        let at_optimum = mean_latency_ms(4, 4);
        assert_eq!(at_optimum, BASE_LATENCY_MS);
        for n in [1, 2, 3, 5, 6, 10] {
            assert!(mean_latency_ms(n, 4) > at_optimum, "n = {n}");
        }
        assert!(mean_latency_ms(1, 4) > mean_latency_ms(3, 4));
        assert!(mean_latency_ms(8, 4) > mean_latency_ms(5, 4));
    }

    #[tokio::test]
    async fn bookkeeping_follows_subject_calls() {
        let link = SimulatedLink::new(&Options::default(), 2, 4, 200, 7);
        assert_eq!(link.num_connections(), 2);

        let id = link.add_connection().await;
        assert_eq!(id, ConnectionId(2));
        assert_eq!(link.num_connections(), 3);

        link.park_connection(id).await;
        assert_eq!(link.num_connections(), 2);
        assert_eq!(link.parked(), 1);

        link.unpark_connection(id).await;
        assert_eq!(link.parked(), 0);

        link.remove_connection(ConnectionId(0)).await;
        assert_eq!(link.num_connections(), 2);
    }

    #[tokio::test]
    async fn measurements_cover_active_connections() {
        let link = SimulatedLink::new(&Options::default(), 3, 2, 300, 1);
        link.park_connection(ConnectionId(1)).await;

        let per_connection = link.measure_per_connection_latency().await;
        let mut ids: Vec<_> = per_connection.keys().copied().collect();
        ids.sort();
        assert_eq!(ids, vec![ConnectionId(0), ConnectionId(2)]);
        assert_eq!(per_connection[&ConnectionId(0)].sample_count(), 150);

        let overall = link.measure_overall_latency().await;
        assert_eq!(overall.sample_count(), 300);
        assert!(overall.client_latency.min() >= overall.server_latency.min());
    }

    #[tokio::test]
    async fn empty_link_measures_nothing() {
        let link = SimulatedLink::new(&Options::default(), 0, 2, 100, 3);
        assert_eq!(link.measure_overall_latency().await.sample_count(), 0);
        assert!(link.measure_per_connection_latency().await.is_empty());
    }
}
