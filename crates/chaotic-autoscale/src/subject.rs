//! The transport side of the control loop.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::metrics::{ConnectionId, Metrics};

/// Boxed future returned by [`Subject`] operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A link whose connection count the [`crate::AutoScaler`] tunes.
///
/// A parked connection accepts no new requests but lets in-flight ones
/// finish; it is either removed or unparked once the experiment that
/// parked it is evaluated.
pub trait Subject: Send + Sync {
    /// Open a new connection and return its id.
    fn add_connection(&self) -> BoxFuture<'_, ConnectionId>;

    /// Close a connection for good.
    fn remove_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()>;

    /// Stop routing new requests to a connection.
    fn park_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()>;

    /// Resume routing to a parked connection.
    fn unpark_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()>;

    /// Latency across the whole link since the previous measurement.
    fn measure_overall_latency(&self) -> BoxFuture<'_, Metrics>;

    /// Latency per active connection since the previous measurement.
    fn measure_per_connection_latency(&self) -> BoxFuture<'_, HashMap<ConnectionId, Metrics>>;

    /// Connections currently carrying traffic (parked ones excluded).
    fn num_connections(&self) -> usize;
}

impl<S: Subject + ?Sized> Subject for Arc<S> {
    fn add_connection(&self) -> BoxFuture<'_, ConnectionId> {
        (**self).add_connection()
    }

    fn remove_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()> {
        (**self).remove_connection(id)
    }

    fn park_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()> {
        (**self).park_connection(id)
    }

    fn unpark_connection(&self, id: ConnectionId) -> BoxFuture<'_, ()> {
        (**self).unpark_connection(id)
    }

    fn measure_overall_latency(&self) -> BoxFuture<'_, Metrics> {
        (**self).measure_overall_latency()
    }

    fn measure_per_connection_latency(&self) -> BoxFuture<'_, HashMap<ConnectionId, Metrics>> {
        (**self).measure_per_connection_latency()
    }

    fn num_connections(&self) -> usize {
        (**self).num_connections()
    }
}
