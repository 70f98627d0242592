//! Error types for discovery and publication
//!
//! Configuration and credential problems fail fast at construction time;
//! store-reachability problems are retried inside the engine and generally
//! never reach the caller once the first load has completed.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failures (empty hosts, empty key, bad file)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed endpoint address
    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// TLS material could not be loaded from disk
    #[error("failed to load credential file {path}: {source}")]
    CredentialLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failures (dial, TLS handshake)
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    /// An RPC was rejected by the store
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// A bounded request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server canceled a watch stream (e.g. lost leadership)
    #[error("watch stream canceled by server")]
    WatchCanceled,

    /// The store reports the lease as expired or revoked
    #[error("lease {0} is no longer alive")]
    LeaseExpired(i64),

    /// The publisher keepalive worker is already running
    #[error("keepalive worker already running for this publisher")]
    AlreadyPublishing,
}
