use std::collections::HashMap;
use std::sync::Arc;

use config::ConfigError;
use parking_lot::Mutex;

use super::Cluster;
use super::ResourceManager;
use crate::constants::DELIMITER;
use crate::constants::ENDPOINTS_SEPARATOR;
use crate::ClientConfig;
use crate::CoordClient;
use crate::Error;
use crate::Result;
use crate::TlsOptions;
use crate::UpdateListener;

/// Entry point for discovery
///
/// Keeps one [`Cluster`] per distinct endpoint set and one store client per
/// cluster, so any number of monitors and publishers against the same store
/// share a single connection. Handles are cheap to clone; clones share state.
///
/// Construct one registry per process (or per test) and pass it around -
/// there is no process-wide singleton.
#[derive(Clone, Default)]
pub struct Registry {
    pub(crate) inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    pub(crate) clusters: Mutex<HashMap<String, Arc<Cluster>>>,
    pub(crate) conn_manager: Arc<ResourceManager<dyn CoordClient>>,
    pub(crate) config: ClientConfig,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            clusters: Mutex::new(HashMap::new()),
            conn_manager: Arc::new(ResourceManager::new()),
            config: ClientConfig::default(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                ..RegistryInner::default()
            }),
        }
    }

    /// Returns the shared store client for `endpoints`, dialing on first
    /// access for this endpoint set.
    pub async fn get_conn(&self, endpoints: &[String]) -> Result<Arc<dyn CoordClient>> {
        self.get_cluster(endpoints, None)?.get_client().await
    }

    /// TLS variant of [`get_conn`](Registry::get_conn).
    ///
    /// Credentials are consumed once, when the cluster for `endpoints` is
    /// first constructed. If the cluster already exists, its connection and
    /// credentials are reused and `tls` is ignored.
    pub async fn get_conn_with_tls(
        &self,
        endpoints: &[String],
        tls: &TlsOptions,
    ) -> Result<Arc<dyn CoordClient>> {
        self.get_cluster(endpoints, Some(tls))?.get_client().await
    }

    /// Monitors `key` on the given endpoints.
    ///
    /// The listener receives the current membership as `on_add` calls before
    /// this returns, then incremental changes for as long as the process
    /// lives. Does not return until the first full load succeeds; an
    /// unreachable store blocks the call (retried with a fixed cool-down).
    pub async fn monitor(
        &self,
        endpoints: &[String],
        key: &str,
        listener: Arc<dyn UpdateListener>,
    ) -> Result<()> {
        self.get_cluster(endpoints, None)?.monitor(key, listener).await
    }

    /// TLS variant of [`monitor`](Registry::monitor); the same
    /// credentials-on-first-construction caveat as
    /// [`get_conn_with_tls`](Registry::get_conn_with_tls) applies.
    pub async fn monitor_with_tls(
        &self,
        endpoints: &[String],
        key: &str,
        tls: &TlsOptions,
        listener: Arc<dyn UpdateListener>,
    ) -> Result<()> {
        self.get_cluster(endpoints, Some(tls))?.monitor(key, listener).await
    }

    /// Stops every watch task and shuts down cached clients.
    ///
    /// Intended for orderly teardown and test isolation; the registry must
    /// not be used afterwards.
    pub async fn close(&self) {
        let clusters: Vec<_> = {
            let mut clusters = self.inner.clusters.lock();
            clusters.drain().map(|(_, cluster)| cluster).collect()
        };
        for cluster in clusters {
            cluster.shutdown().await;
        }
        for client in self.inner.conn_manager.values() {
            client.shutdown();
        }
    }

    pub(crate) fn get_cluster(
        &self,
        endpoints: &[String],
        tls: Option<&TlsOptions>,
    ) -> Result<Arc<Cluster>> {
        if endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "empty coordination store hosts".into(),
            )));
        }

        let cluster_key = make_cluster_key(endpoints);
        if let Some(cluster) = self.inner.clusters.lock().get(&cluster_key) {
            return Ok(cluster.clone());
        }

        // Cache miss: credentials are loaded now (and only now), so unusable
        // material surfaces here instead of as a cluster that can never dial.
        let tls_config = tls.map(|t| t.load()).transpose()?;

        let mut clusters = self.inner.clusters.lock();
        let cluster = clusters.entry(cluster_key.clone()).or_insert_with(|| {
            Arc::new(Cluster::new(
                endpoints.to_vec(),
                cluster_key,
                tls_config,
                self.inner.conn_manager.clone(),
                self.inner.config.clone(),
            ))
        });
        Ok(cluster.clone())
    }
}

/// Cluster identity: sorted endpoints joined with a fixed separator, so the
/// order callers list endpoints in never affects identity.
pub(crate) fn make_cluster_key(endpoints: &[String]) -> String {
    let mut sorted = endpoints.to_vec();
    sorted.sort();
    sorted.join(ENDPOINTS_SEPARATOR)
}

/// Scans and watches cover `key` plus the delimiter, so a sibling key that
/// merely shares a textual prefix is not swept in.
pub(crate) fn make_key_prefix(key: &str) -> String {
    format!("{key}{DELIMITER}")
}
