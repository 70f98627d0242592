//! Discovery registry
//!
//! Core components of the watch side of the crate:
//! - [`Registry`] - entry point; keyed cache of per-endpoint-set clusters
//! - `Cluster` - per-endpoint-set snapshot + watch/resync state machine
//! - `ResourceManager` - process-wide connection dedup with single-flight dial
//! - `StateWatcher` - connectivity observer triggering resynchronization
//! - [`UpdateListener`] - callback capability implemented by callers

mod cluster;
mod listener;
mod registry;
mod resource;
mod state_watcher;

pub use listener::*;
pub use registry::*;

pub(crate) use cluster::*;
pub(crate) use resource::*;
pub(crate) use state_watcher::*;
