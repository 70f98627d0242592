//! In-memory coordination store fake and shared test helpers.
//!
//! [`MemoryStore`] implements [`CoordClient`] without a network and exposes
//! knobs for the failure modes the engine must survive: silent divergence,
//! broken watch streams, expired leases, induced read failures and
//! connectivity transitions.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::ConnectivityState;
use crate::CoordClient;
use crate::Error;
use crate::KeepAliveStream;
use crate::LeaseId;
use crate::Registry;
use crate::Result;
use crate::UpdateListener;
use crate::WatchEvent;
use crate::WatchEventType;
use crate::WatchStream;
use crate::KV;

/// Lets every queued task (watch loops, reloads, workers) run to quiescence.
/// Tests run with paused time, so this advances instantly once idle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Caches `store` as the client for `endpoints`, so registry operations reach
/// the fake instead of dialing.
pub(crate) async fn seed_registry(registry: &Registry, endpoints: &[String], store: &MemoryStore) {
    let key = crate::registry::make_cluster_key(endpoints);
    let client: Arc<dyn CoordClient> = Arc::new(store.clone());
    registry
        .inner
        .conn_manager
        .get_or_create(&key, || async move { Ok(client) })
        .await
        .expect("seeding cannot fail");
}

#[derive(Clone)]
pub(crate) struct MemoryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    data: Mutex<BTreeMap<String, Entry>>,
    leases: Mutex<HashMap<LeaseId, LeaseHandle>>,
    watchers: Mutex<Vec<Watcher>>,
    next_lease: AtomicI64,
    range_failures: AtomicUsize,
    state_tx: watch::Sender<ConnectivityState>,
}

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<Result<Vec<WatchEvent>>>,
}

#[derive(Default)]
struct LeaseHandle {
    keepalive_txs: Vec<mpsc::UnboundedSender<Result<LeaseId>>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Ready);
        Self {
            inner: Arc::new(StoreInner {
                data: Mutex::new(BTreeMap::new()),
                leases: Mutex::new(HashMap::new()),
                watchers: Mutex::new(Vec::new()),
                next_lease: AtomicI64::new(1000),
                range_failures: AtomicUsize::new(0),
                state_tx,
            }),
        }
    }

    /// Writes a key as an external party would: visible to reads and watchers.
    pub(crate) fn put_external(&self, key: &str, value: &str) {
        self.inner.data.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease: None,
            },
        );
        self.emit(key, value, WatchEventType::Put);
    }

    /// Deletes a key, notifying watchers. The event carries no value, the way
    /// a real store reports deletes.
    pub(crate) fn delete_external(&self, key: &str) {
        self.inner.data.lock().remove(key);
        self.emit(key, "", WatchEventType::Delete);
    }

    /// Mutates data without any watch event, simulating changes that happen
    /// while the client is partitioned away.
    pub(crate) fn put_silent(&self, key: &str, value: &str) {
        self.inner.data.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease: None,
            },
        );
    }

    pub(crate) fn delete_silent(&self, key: &str) {
        self.inner.data.lock().remove(key);
    }

    /// Drives the connectivity signal observed through `subscribe_state`.
    pub(crate) fn set_state(&self, state: ConnectivityState) {
        let _ = self.inner.state_tx.send(state);
    }

    /// Tears down every open watch stream without touching data, as a dropped
    /// connection would.
    pub(crate) fn break_watch_streams(&self) {
        self.inner.watchers.lock().clear();
    }

    /// Fails the next `n` range reads with an unavailable status.
    pub(crate) fn fail_next_ranges(&self, n: usize) {
        self.inner.range_failures.store(n, Ordering::SeqCst);
    }

    /// Kills a lease the way TTL expiry would: bound keys are deleted with
    /// events, and keepalive streams for the lease end.
    pub(crate) fn expire_lease(&self, lease: LeaseId) {
        self.remove_lease(lease);
    }

    pub(crate) fn open_watchers(&self) -> usize {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        watchers.len()
    }

    pub(crate) fn keys_with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.inner
            .data
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub(crate) fn lease_ids(&self) -> Vec<LeaseId> {
        self.inner.leases.lock().keys().copied().collect()
    }

    fn emit(&self, key: &str, value: &str, event_type: WatchEventType) {
        let event = WatchEvent {
            key: key.to_string(),
            value: value.to_string(),
            event_type,
        };
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|w| {
            if !key.starts_with(&w.prefix) {
                return !w.tx.is_closed();
            }
            w.tx.send(Ok(vec![event.clone()])).is_ok()
        });
    }

    fn remove_lease(&self, lease: LeaseId) {
        // Dropping the handle ends the keepalive streams.
        self.inner.leases.lock().remove(&lease);

        let bound: Vec<String> = {
            let mut data = self.inner.data.lock();
            let keys: Vec<String> = data
                .iter()
                .filter(|(_, e)| e.lease == Some(lease))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                data.remove(key);
            }
            keys
        };
        for key in bound {
            self.emit(&key, "", WatchEventType::Delete);
        }
    }
}

#[async_trait]
impl CoordClient for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KV>> {
        let pending = self.inner.range_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.inner.range_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Rpc(tonic::Status::unavailable("injected failure")));
        }

        Ok(self
            .inner
            .data
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KV {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.watchers.lock().push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn lease_grant(&self, _ttl_seconds: i64) -> Result<LeaseId> {
        let lease = self.inner.next_lease.fetch_add(1, Ordering::SeqCst);
        self.inner.leases.lock().insert(lease, LeaseHandle::default());
        Ok(lease)
    }

    async fn lease_keep_alive(&self, lease_id: LeaseId) -> Result<KeepAliveStream> {
        let mut leases = self.inner.leases.lock();
        let handle = leases
            .get_mut(&lease_id)
            .ok_or(Error::LeaseExpired(lease_id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.keepalive_txs.push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn lease_revoke(&self, lease_id: LeaseId) -> Result<()> {
        self.remove_lease(lease_id);
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        if let Some(lease) = lease {
            if !self.inner.leases.lock().contains_key(&lease) {
                return Err(Error::LeaseExpired(lease));
            }
        }
        self.inner.data.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        self.emit(key, value, WatchEventType::Put);
        Ok(())
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state_tx.subscribe()
    }

    fn shutdown(&self) {
        let _ = self.inner.state_tx.send(ConnectivityState::Shutdown);
    }
}

/// Records every callback it receives, preserving arrival order.
pub(crate) struct RecordingListener {
    events: Mutex<Vec<(WatchEventType, KV)>>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn adds(&self) -> Vec<KV> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| *t == WatchEventType::Put)
            .map(|(_, kv)| kv.clone())
            .collect()
    }

    pub(crate) fn deletes(&self) -> Vec<KV> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| *t == WatchEventType::Delete)
            .map(|(_, kv)| kv.clone())
            .collect()
    }

    /// Ordered log of every event, adds and deletes interleaved.
    pub(crate) fn events(&self) -> Vec<(WatchEventType, KV)> {
        self.events.lock().clone()
    }
}

impl UpdateListener for RecordingListener {
    fn on_add(&self, kv: KV) {
        self.events.lock().push((WatchEventType::Put, kv));
    }

    fn on_delete(&self, kv: KV) {
        self.events.lock().push((WatchEventType::Delete, kv));
    }
}
