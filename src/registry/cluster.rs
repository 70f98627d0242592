use std::collections::HashMap;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::ClientTlsConfig;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::make_key_prefix;
use super::ResourceManager;
use super::StateWatcher;
use crate::constants::COOL_DOWN_INTERVAL;
use crate::ClientConfig;
use crate::CoordClient;
use crate::GrpcCoordClient;
use crate::UpdateListener;
use crate::WatchEvent;
use crate::WatchEventType;
use crate::KV;

/// Per-endpoint-set discovery state machine
///
/// Owns the local snapshot of every watched prefix, the registered
/// listeners, and the watch tasks of the current generation. Lives for the
/// process lifetime once created; a connectivity recovery replaces the whole
/// generation of watch tasks with a fresh load (see [`Cluster::reload`]).
pub(crate) struct Cluster {
    endpoints: Vec<String>,
    /// sorted-endpoints identity, shared with the connection cache
    key: String,
    tls: Option<ClientTlsConfig>,
    config: ClientConfig,
    conn_manager: Arc<ResourceManager<dyn CoordClient>>,
    state: Mutex<ClusterState>,
    /// serializes monitor and reload: a prefix is loaded exactly once, and a
    /// monitor interleaving with a generation swap cannot double-watch it
    monitor_lock: Mutex<()>,
}

struct ClusterState {
    /// last known snapshot per watched prefix: full key -> value
    values: HashMap<String, HashMap<String, String>>,
    listeners: HashMap<String, Vec<Arc<dyn UpdateListener>>>,
    /// prefixes that already have a watch task; repeat monitors fan out to
    /// the existing one instead of opening a second stream
    watching: HashSet<String>,
    /// bumped by every reload; watch tasks belong to exactly one generation
    generation: u64,
    cancel: CancellationToken,
    tasks: TaskTracker,
    conn_state_watched: bool,
}

impl Cluster {
    pub(crate) fn new(
        endpoints: Vec<String>,
        key: String,
        tls: Option<ClientTlsConfig>,
        conn_manager: Arc<ResourceManager<dyn CoordClient>>,
        config: ClientConfig,
    ) -> Self {
        Self {
            endpoints,
            key,
            tls,
            config,
            conn_manager,
            state: Mutex::new(ClusterState {
                values: HashMap::new(),
                listeners: HashMap::new(),
                watching: HashSet::new(),
                generation: 0,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                conn_state_watched: false,
            }),
            monitor_lock: Mutex::new(()),
        }
    }

    /// Resolves the shared store client for this cluster, dialing it exactly
    /// once per endpoint set, and hooks up the connectivity watcher on first
    /// resolution.
    pub(crate) async fn get_client(self: &Arc<Self>) -> crate::Result<Arc<dyn CoordClient>> {
        let endpoints = self.endpoints.clone();
        let tls = self.tls.clone();
        let config = self.config.clone();
        let client = self
            .conn_manager
            .get_or_create(&self.key, || async move {
                let client = GrpcCoordClient::connect(&endpoints, tls, config).await?;
                Ok(Arc::new(client) as Arc<dyn CoordClient>)
            })
            .await?;

        self.watch_conn_state(&client).await;

        Ok(client)
    }

    /// Registers `listener` under `key`, loads the current membership and
    /// keeps it updated through a watch task.
    ///
    /// Synchronous contract: the initial snapshot has been delivered to the
    /// listener by the time this returns. The first load retries forever, so
    /// an unreachable store blocks the call rather than failing it.
    pub(crate) async fn monitor(
        self: &Arc<Self>,
        key: &str,
        listener: Arc<dyn UpdateListener>,
    ) -> crate::Result<()> {
        if key.is_empty() {
            return Err(crate::Error::Config(config::ConfigError::Message(
                "empty coordination store key".into(),
            )));
        }

        let _guard = self.monitor_lock.lock().await;

        let client = self.get_client().await?;

        let (first, snapshot) = {
            let mut state = self.state.lock().await;
            state
                .listeners
                .entry(key.to_string())
                .or_default()
                .push(listener.clone());
            if state.watching.contains(key) {
                let snapshot = state
                    .values
                    .get(key)
                    .map(|vals| {
                        vals.iter()
                            .map(|(k, v)| KV {
                                key: k.clone(),
                                value: v.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (false, snapshot)
            } else {
                state.watching.insert(key.to_string());
                (true, Vec::new())
            }
        };

        if !first {
            // A watch task already covers this prefix. Replay the snapshot to
            // the new listener so it observes the same initial adds the first
            // listener did, instead of silence until the next change.
            debug!(key, entries = snapshot.len(), "prefix already watched, replaying snapshot");
            for kv in snapshot {
                notify_add(&listener, kv);
            }
            return Ok(());
        }

        self.load(&client, key, None).await;

        let (token, tracker) = {
            let state = self.state.lock().await;
            (state.cancel.clone(), state.tasks.clone())
        };
        let cluster = self.clone();
        let prefix = key.to_string();
        tracker.spawn(async move { cluster.watch(client, prefix, token).await });

        Ok(())
    }

    /// One-shot full read of everything under `key`, diffed into the
    /// snapshot. Retries forever with a fixed cool-down; only a generation
    /// cancellation (when one is supplied) cuts the loop short.
    async fn load(
        &self,
        client: &Arc<dyn CoordClient>,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) {
        let prefix = make_key_prefix(key);
        let kvs = loop {
            let read = tokio::time::timeout(self.config.request_timeout, client.get_prefix(&prefix));
            match read.await {
                Ok(Ok(kvs)) => break kvs,
                Ok(Err(e)) => error!(%prefix, error = %e, "full load failed"),
                Err(_) => error!(%prefix, timeout = ?self.config.request_timeout, "full load timed out"),
            }
            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(COOL_DOWN_INTERVAL) => {}
                },
                None => tokio::time::sleep(COOL_DOWN_INTERVAL).await,
            }
        };

        self.handle_changes(key, kvs).await;
    }

    /// Replaces the snapshot for `key` with `kvs` and notifies listeners of
    /// the difference: entries that are new or changed as adds, entries whose
    /// key vanished as deletes (carrying the last known value). The first
    /// observation of a prefix is all adds.
    ///
    /// The listener list is copied under the lock and callbacks run after it
    /// is released: a callback that re-enters the registry must not deadlock.
    async fn handle_changes(&self, key: &str, kvs: Vec<KV>) {
        let (added, removed, listeners) = {
            let mut state = self.state.lock().await;
            let listeners = state.listeners.get(key).cloned().unwrap_or_default();
            let new_vals: HashMap<String, String> = kvs
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone()))
                .collect();
            match state.values.insert(key.to_string(), new_vals.clone()) {
                None => (kvs, Vec::new(), listeners),
                Some(old_vals) => {
                    let mut added = Vec::new();
                    for (k, v) in &new_vals {
                        if old_vals.get(k) != Some(v) {
                            added.push(KV {
                                key: k.clone(),
                                value: v.clone(),
                            });
                        }
                    }
                    let mut removed = Vec::new();
                    for (k, v) in &old_vals {
                        if !new_vals.contains_key(k) {
                            removed.push(KV {
                                key: k.clone(),
                                value: v.clone(),
                            });
                        }
                    }
                    (added, removed, listeners)
                }
            }
        };

        for kv in added {
            for listener in &listeners {
                notify_add(listener, kv.clone());
            }
        }
        for kv in removed {
            for listener in &listeners {
                notify_delete(listener, kv.clone());
            }
        }
    }

    /// Applies a batch of incremental watch events to the snapshot: puts
    /// overwrite and fire adds, deletes remove and fire deletes carrying the
    /// last known value.
    async fn handle_watch_events(&self, key: &str, events: Vec<WatchEvent>) {
        let listeners = {
            let state = self.state.lock().await;
            state.listeners.get(key).cloned().unwrap_or_default()
        };

        for event in events {
            match event.event_type {
                WatchEventType::Put => {
                    {
                        let mut state = self.state.lock().await;
                        state
                            .values
                            .entry(key.to_string())
                            .or_default()
                            .insert(event.key.clone(), event.value.clone());
                    }
                    let kv = KV {
                        key: event.key,
                        value: event.value,
                    };
                    for listener in &listeners {
                        notify_add(listener, kv.clone());
                    }
                }
                WatchEventType::Delete => {
                    let last_value = {
                        let mut state = self.state.lock().await;
                        state
                            .values
                            .get_mut(key)
                            .and_then(|vals| vals.remove(&event.key))
                    };
                    // delete events carry no payload worth trusting
                    let kv = KV {
                        key: event.key,
                        value: last_value.unwrap_or(event.value),
                    };
                    for listener in &listeners {
                        notify_delete(listener, kv.clone());
                    }
                }
            }
        }
    }

    /// Watch task body: keeps a stream over `key` open for the lifetime of
    /// its generation, resubscribing immediately whenever the stream dies.
    async fn watch(
        self: Arc<Self>,
        client: Arc<dyn CoordClient>,
        key: String,
        cancel: CancellationToken,
    ) {
        loop {
            if self.watch_stream(&client, &key, &cancel).await {
                debug!(%key, "watch task retired with its generation");
                return;
            }
        }
    }

    /// Returns true when the generation was cancelled; any other exit means
    /// the stream died and the caller resubscribes.
    async fn watch_stream(
        &self,
        client: &Arc<dyn CoordClient>,
        key: &str,
        cancel: &CancellationToken,
    ) -> bool {
        let prefix = make_key_prefix(key);
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return true,
            subscribed = client.watch_prefix(&prefix) => match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    error!(%prefix, error = %e, "watch subscription failed");
                    return false;
                }
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return true,
                batch = stream.next() => match batch {
                    Some(Ok(events)) => self.handle_watch_events(key, events).await,
                    Some(Err(e)) => {
                        error!(%prefix, error = %e, "watch stream failed");
                        return false;
                    }
                    None => {
                        error!(%prefix, "watch stream closed");
                        return false;
                    }
                }
            }
        }
    }

    /// Full resynchronization after a connectivity recovery.
    ///
    /// A watch stream does not survive every class of partition or leader
    /// change, so resuming the old stream risks silently missed events.
    /// Instead the current generation is cancelled and fully drained, then a
    /// fresh generation re-runs load+watch for every registered prefix.
    pub(crate) async fn reload(self: &Arc<Self>, client: Arc<dyn CoordClient>) {
        let _guard = self.monitor_lock.lock().await;

        let (old_tasks, keys, generation, token, tracker) = {
            let mut state = self.state.lock().await;
            state.cancel.cancel();
            let old_tasks = std::mem::replace(&mut state.tasks, TaskTracker::new());
            state.cancel = CancellationToken::new();
            state.generation += 1;
            (
                old_tasks,
                state.listeners.keys().cloned().collect::<Vec<_>>(),
                state.generation,
                state.cancel.clone(),
                state.tasks.clone(),
            )
        };

        // The old generation must fully drain before the new one starts, so
        // a stale watch task can never race the fresh snapshots.
        old_tasks.close();
        old_tasks.wait().await;
        info!(cluster = %self.key, generation, prefixes = keys.len(), "resynchronizing");

        for key in keys {
            let cluster = self.clone();
            let client = client.clone();
            let cancel = token.clone();
            tracker.spawn(async move {
                cluster.load(&client, &key, Some(&cancel)).await;
                if cancel.is_cancelled() {
                    return;
                }
                cluster.watch(client, key, cancel).await;
            });
        }
    }

    /// Cancels the current generation and waits for its tasks to finish.
    pub(crate) async fn shutdown(&self) {
        let tracker = {
            let state = self.state.lock().await;
            state.cancel.cancel();
            state.tasks.close();
            state.tasks.clone()
        };
        tracker.wait().await;
    }

    /// Subscribes a connectivity watcher for this cluster's client, exactly
    /// once; a recovery after loss triggers an asynchronous reload.
    async fn watch_conn_state(self: &Arc<Self>, client: &Arc<dyn CoordClient>) {
        {
            let mut state = self.state.lock().await;
            if state.conn_state_watched {
                return;
            }
            state.conn_state_watched = true;
        }

        let mut watcher = StateWatcher::new();
        let cluster = self.clone();
        let reload_client = client.clone();
        watcher.add_listener(move || {
            let cluster = cluster.clone();
            let client = reload_client.clone();
            tokio::spawn(async move { cluster.reload(client).await });
        });

        let states = client.subscribe_state();
        tokio::spawn(watcher.watch(states));
    }

    #[cfg(test)]
    pub(crate) async fn snapshot(&self, key: &str) -> HashMap<String, String> {
        let state = self.state.lock().await;
        state.values.get(key).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }
}

/// Listener callbacks are isolated: a panicking listener is logged and
/// dropped instead of unwinding into the watch task.
fn notify_add(listener: &Arc<dyn UpdateListener>, kv: KV) {
    let key = kv.key.clone();
    if std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_add(kv))).is_err() {
        error!(%key, "update listener panicked in on_add");
    }
}

fn notify_delete(listener: &Arc<dyn UpdateListener>, kv: KV) {
    let key = kv.key.clone();
    if std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_delete(kv))).is_err() {
        error!(%key, "update listener panicked in on_delete");
    }
}
