use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::constants::DELIMITER;
use crate::constants::TIME_TO_LIVE_SECS;
use crate::CoordClient;
use crate::Error;
use crate::KeepAliveStream;
use crate::LeaseId;
use crate::Registry;
use crate::Result;
use crate::TlsOptions;

/// Synchronous signal: the sender blocks until the worker acknowledges.
type Ack = oneshot::Sender<()>;

/// Publishes a key/value pair to the coordination store under a renewable
/// lease.
///
/// The published leaf key is `key/<id>`, where `<id>` is the explicit id when
/// one is set (stable across re-registrations) and the granted lease id
/// otherwise (unique per lease). Connections are resolved through the shared
/// [`Registry`], so a publisher and a monitor against the same endpoints use
/// one client.
///
/// # States
/// unregistered -> renewing -> paused -> renewing (resume) or stopped
pub struct Publisher {
    registry: Registry,
    endpoints: Vec<String>,
    key: String,
    value: String,
    tls: Option<TlsOptions>,
    explicit_id: Option<i64>,
    pause_tx: mpsc::Sender<Ack>,
    resume_tx: mpsc::Sender<Ack>,
    quit: CancellationToken,
    signals: Mutex<Option<WorkerSignals>>,
}

struct WorkerSignals {
    pause_rx: mpsc::Receiver<Ack>,
    resume_rx: mpsc::Receiver<Ack>,
}

impl Publisher {
    /// Creates a publisher for `key` with the given `value`.
    ///
    /// Nothing is written until [`keep_alive`](Publisher::keep_alive) runs.
    pub fn new(registry: Registry, endpoints: Vec<String>, key: String, value: String) -> Self {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);
        Self {
            registry,
            endpoints,
            key,
            value,
            tls: None,
            explicit_id: None,
            pause_tx,
            resume_tx,
            quit: CancellationToken::new(),
            signals: Mutex::new(Some(WorkerSignals {
                pause_rx,
                resume_rx,
            })),
        }
    }

    /// Keeps the published leaf key stable across re-registrations instead
    /// of deriving it from the lease id.
    pub fn with_id(mut self, id: i64) -> Self {
        self.explicit_id = Some(id);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Registers the pair under a fresh lease and starts the background
    /// renewal worker.
    ///
    /// Blocks until the first registration succeeds; renewal failures after
    /// that are handled (and logged) by the worker. Calling this twice on one
    /// publisher is an error.
    pub async fn keep_alive(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Config(config::ConfigError::Message(
                "empty coordination store key".into(),
            )));
        }

        let signals = self
            .signals
            .lock()
            .take()
            .ok_or(Error::AlreadyPublishing)?;

        let client = resolve_client(&self.registry, &self.endpoints, self.tls.as_ref()).await?;
        let session = register(&client, &self.key, &self.value, self.explicit_id).await?;
        let stream = client.lease_keep_alive(session.lease).await?;

        let worker = KeepAliveWorker {
            registry: self.registry.clone(),
            endpoints: self.endpoints.clone(),
            tls: self.tls.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            explicit_id: self.explicit_id,
            pause_rx: signals.pause_rx,
            resume_rx: signals.resume_rx,
            quit: self.quit.clone(),
        };
        tokio::spawn(worker.run(client, session, stream));

        Ok(())
    }

    /// Suspends renewal and revokes the current registration.
    ///
    /// A synchronous handshake: completes once the worker has revoked the
    /// lease. Returns immediately if the worker has already exited.
    pub async fn pause(&self) {
        signal(&self.pause_tx).await;
    }

    /// Re-registers under a fresh lease after a [`pause`](Publisher::pause).
    ///
    /// Completes once the worker has re-registered. A resume sent while the
    /// publisher is not paused is consumed by the worker at its next pause.
    pub async fn resume(&self) {
        signal(&self.resume_tx).await;
    }

    /// Permanently stops renewal and revokes the registration.
    ///
    /// Idempotent: any number of calls, from any thread, is safe.
    pub fn stop(&self) {
        self.quit.cancel();
    }
}

async fn signal(tx: &mpsc::Sender<Ack>) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if tx.send(ack_tx).await.is_err() {
        // worker already gone
        return;
    }
    let _ = ack_rx.await;
}

async fn resolve_client(
    registry: &Registry,
    endpoints: &[String],
    tls: Option<&TlsOptions>,
) -> Result<Arc<dyn CoordClient>> {
    match tls {
        Some(tls) => registry.get_conn_with_tls(endpoints, tls).await,
        None => registry.get_conn(endpoints).await,
    }
}

struct Session {
    lease: LeaseId,
    full_key: String,
}

/// Grants a lease and writes the published pair bound to it.
async fn register(
    client: &Arc<dyn CoordClient>,
    key: &str,
    value: &str,
    explicit_id: Option<i64>,
) -> Result<Session> {
    let lease = client.lease_grant(TIME_TO_LIVE_SECS).await?;
    let id = explicit_id.unwrap_or(lease);
    let full_key = format!("{key}{DELIMITER}{id}");
    client.put(&full_key, value, Some(lease)).await?;
    debug!(%full_key, lease, "registered");

    Ok(Session { lease, full_key })
}

async fn revoke(client: &Arc<dyn CoordClient>, session: &Session) {
    if let Err(e) = client.lease_revoke(session.lease).await {
        error!(full_key = %session.full_key, lease = session.lease, error = %e, "lease revoke failed");
    }
}

/// Background renewal worker.
///
/// One explicit loop drives the whole lifecycle - lease loss, pause/resume
/// and stop - so flapping connectivity can never grow the call stack.
struct KeepAliveWorker {
    registry: Registry,
    endpoints: Vec<String>,
    tls: Option<TlsOptions>,
    key: String,
    value: String,
    explicit_id: Option<i64>,
    pause_rx: mpsc::Receiver<Ack>,
    resume_rx: mpsc::Receiver<Ack>,
    quit: CancellationToken,
}

impl KeepAliveWorker {
    async fn run(
        mut self,
        mut client: Arc<dyn CoordClient>,
        mut session: Session,
        mut stream: KeepAliveStream,
    ) {
        loop {
            tokio::select! {
                renewal = stream.next() => {
                    if matches!(renewal, Some(Ok(_))) {
                        continue;
                    }
                    match renewal {
                        Some(Err(e)) => info!(key = %self.key, error = %e, "keepalive stream failed"),
                        _ => info!(key = %self.key, "keepalive stream closed"),
                    }
                    // The lease is gone or unrenewable: drop it and run the
                    // full registration sequence from scratch.
                    revoke(&client, &session).await;
                    match self.reregister().await {
                        Ok((new_client, new_session, new_stream)) => {
                            client = new_client;
                            session = new_session;
                            stream = new_stream;
                        }
                        Err(e) => {
                            error!(key = %self.key, error = %e, "re-registration failed, stopping renewal");
                            return;
                        }
                    }
                }
                Some(ack) = self.pause_rx.recv() => {
                    info!(key = %self.key, value = %self.value, "paused renewal");
                    revoke(&client, &session).await;
                    let _ = ack.send(());
                    tokio::select! {
                        resumed = self.resume_rx.recv() => {
                            let Some(ack) = resumed else { return };
                            match self.reregister().await {
                                Ok((new_client, new_session, new_stream)) => {
                                    client = new_client;
                                    session = new_session;
                                    stream = new_stream;
                                    info!(key = %self.key, "resumed renewal");
                                    let _ = ack.send(());
                                }
                                Err(e) => {
                                    error!(key = %self.key, error = %e, "re-registration failed, stopping renewal");
                                    let _ = ack.send(());
                                    return;
                                }
                            }
                        }
                        _ = self.quit.cancelled() => return,
                    }
                }
                _ = self.quit.cancelled() => {
                    revoke(&client, &session).await;
                    return;
                }
            }
        }
    }

    async fn reregister(&self) -> Result<(Arc<dyn CoordClient>, Session, KeepAliveStream)> {
        let client =
            resolve_client(&self.registry, &self.endpoints, self.tls.as_ref()).await?;
        let session = register(&client, &self.key, &self.value, self.explicit_id).await?;
        let stream = client.lease_keep_alive(session.lease).await?;
        Ok((client, session, stream))
    }
}
