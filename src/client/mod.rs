//! Coordination store client boundary
//!
//! [`CoordClient`] is the seam between the discovery engine and the store:
//! everything the engine consumes - prefix range reads, prefix watch streams,
//! leases and connectivity observation - goes through this trait.
//! [`GrpcCoordClient`] is the production implementation.

mod grpc;

pub use grpc::*;


use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
#[cfg(test)]
use mockall::automock;
use tokio::sync::watch;

use crate::Result;

/// Lease identifier granted by the store.
pub type LeaseId = i64;

/// An immutable key/value pair read from or written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KV {
    pub key: String,
    pub value: String,
}

/// Kind of change carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    /// Key was inserted or updated
    Put,
    /// Key was deleted, explicitly or through lease expiry
    Delete,
}

/// A single key change delivered on a watch stream.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: String,
    /// New value for puts; may be empty for deletes
    pub value: String,
    pub event_type: WatchEventType,
}

/// Connectivity of the underlying transport, as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Ready,
    TransientFailure,
    Shutdown,
}

/// Batches of watch events; an `Err` item means the stream is unusable and
/// the consumer must resubscribe.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<Vec<WatchEvent>>> + Send>>;

/// Lease renewal acknowledgements; stream end or an `Err` item means the
/// lease can no longer be renewed on this stream.
pub type KeepAliveStream = Pin<Box<dyn Stream<Item = Result<LeaseId>> + Send>>;

/// Client interface to the coordination store.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// cluster and publisher resolved for the same endpoint set.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordClient: Send + Sync {
    /// Reads every key sharing `prefix`, with its current value.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KV>>;

    /// Opens a long-lived watch stream over `prefix`.
    ///
    /// The stream requires a leader on the server side, so a partitioned
    /// member cancels it instead of serving stale events.
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;

    /// Grants a lease with the given time-to-live.
    async fn lease_grant(&self, ttl_seconds: i64) -> Result<LeaseId>;

    /// Opens a renewal stream keeping `lease_id` alive until the stream is
    /// dropped or the connection is lost.
    async fn lease_keep_alive(&self, lease_id: LeaseId) -> Result<KeepAliveStream>;

    /// Revokes a lease, deleting every key bound to it.
    async fn lease_revoke(&self, lease_id: LeaseId) -> Result<()>;

    /// Writes a key/value pair, bound to `lease` when given.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()>;

    /// Observes connectivity transitions of the underlying transport.
    fn subscribe_state(&self) -> watch::Receiver<ConnectivityState>;

    /// Stops background work owned by the client (probers, renewal senders).
    fn shutdown(&self);
}
