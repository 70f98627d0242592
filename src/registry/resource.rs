use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::Result;

/// Keyed resource cache with single-flight construction.
///
/// At most one live resource exists per key. Callers racing on the same key
/// share one construction attempt; a successful result is cached for the
/// process lifetime, a failed one is not, so the next caller dials from
/// scratch.
pub(crate) struct ResourceManager<T: ?Sized> {
    resources: DashMap<String, Arc<OnceCell<Arc<T>>>>,
}

impl<T: ?Sized> ResourceManager<T> {
    pub(crate) fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    /// Returns the resource for `key`, running `factory` if none is cached.
    pub(crate) async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        let cell = {
            // the map guard must not be held across an await
            let entry = self.resources.entry(key.to_string()).or_default();
            Arc::clone(entry.value())
        };

        let resource = cell.get_or_try_init(factory).await?;
        Ok(Arc::clone(resource))
    }

    /// Every successfully constructed resource currently cached.
    pub(crate) fn values(&self) -> Vec<Arc<T>> {
        self.resources
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }
}
