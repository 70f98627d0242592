use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Endpoint;
use tonic::Request;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;

use super::ConnectivityState;
use super::CoordClient;
use super::KeepAliveStream;
use super::LeaseId;
use super::WatchEvent;
use super::WatchEventType;
use super::WatchStream;
use super::KV;
use crate::constants::TIME_TO_LIVE_SECS;
use crate::proto::coordination::kv_service_client::KvServiceClient;
use crate::proto::coordination::lease_service_client::LeaseServiceClient;
use crate::proto::coordination::EventType;
use crate::proto::coordination::LeaseGrantRequest;
use crate::proto::coordination::LeaseKeepAliveRequest;
use crate::proto::coordination::LeaseRevokeRequest;
use crate::proto::coordination::PutRequest;
use crate::proto::coordination::RangeRequest;
use crate::proto::coordination::WatchRequest;
use crate::ClientConfig;
use crate::Error;
use crate::Result;

/// gRPC-backed coordination store client
///
/// Holds one multi-endpoint channel per endpoint set and a background prober
/// publishing connectivity transitions over a watch channel. Service clients
/// are cheap per-call wrappers around the shared channel.
pub struct GrpcCoordClient {
    channel: Channel,
    config: ClientConfig,
    state_rx: watch::Receiver<ConnectivityState>,
    shutdown: CancellationToken,
}

impl GrpcCoordClient {
    /// Builds a client over the given endpoints.
    ///
    /// Connections are established lazily; reachability problems surface on
    /// the first RPC, not here. Construction fails only on malformed
    /// addresses or unusable TLS material.
    pub async fn connect(
        endpoints: &[String],
        tls: Option<ClientTlsConfig>,
        config: ClientConfig,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::Config(config::ConfigError::Message(
                "empty coordination store hosts".into(),
            )));
        }

        let scheme = if tls.is_some() { "https" } else { "http" };
        let mut targets = Vec::with_capacity(endpoints.len());
        for addr in endpoints {
            let mut endpoint = Endpoint::try_from(address_str(addr, scheme))
                .map_err(|_| Error::InvalidAddress(addr.clone()))?
                .connect_timeout(config.connect_timeout)
                .timeout(config.request_timeout)
                .tcp_keepalive(Some(config.tcp_keepalive))
                .http2_keep_alive_interval(config.http2_keepalive_interval)
                .keep_alive_timeout(config.http2_keepalive_timeout);
            if let Some(tls) = &tls {
                endpoint = endpoint.tls_config(tls.clone())?;
            }
            targets.push(endpoint);
        }

        let channel = Channel::balance_list(targets.into_iter());
        let (state_tx, state_rx) = watch::channel(ConnectivityState::Ready);
        let shutdown = CancellationToken::new();
        tokio::spawn(probe_connectivity(
            channel.clone(),
            state_tx,
            config.health_probe_interval,
            shutdown.clone(),
        ));

        Ok(Self {
            channel,
            config,
            state_rx,
            shutdown,
        })
    }

    fn kv(&self) -> KvServiceClient<Channel> {
        let mut client = KvServiceClient::new(self.channel.clone());
        if self.config.enable_compression {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        client
    }

    fn lease(&self) -> LeaseServiceClient<Channel> {
        let mut client = LeaseServiceClient::new(self.channel.clone());
        if self.config.enable_compression {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        client
    }
}

impl Drop for GrpcCoordClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CoordClient for GrpcCoordClient {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KV>> {
        let response = self
            .kv()
            .range(Request::new(RangeRequest {
                prefix: prefix.to_string(),
            }))
            .await?;

        Ok(response
            .into_inner()
            .kvs
            .into_iter()
            .map(|kv| KV {
                key: kv.key,
                value: kv.value,
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let response = self
            .kv()
            .watch(Request::new(WatchRequest {
                prefix: prefix.to_string(),
                require_leader: true,
            }))
            .await?;

        let stream = response.into_inner().map(|item| match item {
            Ok(resp) => {
                if resp.canceled {
                    return Err(Error::WatchCanceled);
                }
                Ok(resp
                    .events
                    .into_iter()
                    .filter_map(|ev| {
                        let event_type = match ev.event_type() {
                            EventType::Put => WatchEventType::Put,
                            EventType::Delete => WatchEventType::Delete,
                        };
                        ev.kv.map(|kv| WatchEvent {
                            key: kv.key,
                            value: kv.value,
                            event_type,
                        })
                    })
                    .collect())
            }
            Err(status) => Err(Error::Rpc(status)),
        });

        Ok(Box::pin(stream))
    }

    async fn lease_grant(&self, ttl_seconds: i64) -> Result<LeaseId> {
        let response = self
            .lease()
            .grant(Request::new(LeaseGrantRequest { ttl_seconds }))
            .await?;

        Ok(response.into_inner().lease_id)
    }

    async fn lease_keep_alive(&self, lease_id: LeaseId) -> Result<KeepAliveStream> {
        // The first renewal request is buffered up front so the server sees
        // traffic as soon as the stream opens.
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(LeaseKeepAliveRequest { lease_id });

        let response = self.lease().keep_alive(ReceiverStream::new(rx)).await?;

        let send_interval = Duration::from_secs((TIME_TO_LIVE_SECS as u64 / 3).max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(send_interval);
            // interval fires immediately; the buffered request covered that
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(LeaseKeepAliveRequest { lease_id }).await.is_err() {
                    debug!(lease_id, "keepalive stream torn down, stopping renewals");
                    return;
                }
            }
        });

        let stream = response.into_inner().map(move |item| match item {
            Ok(resp) if resp.ttl_seconds <= 0 => Err(Error::LeaseExpired(lease_id)),
            Ok(resp) => Ok(resp.lease_id),
            Err(status) => Err(Error::Rpc(status)),
        });

        Ok(Box::pin(stream))
    }

    async fn lease_revoke(&self, lease_id: LeaseId) -> Result<()> {
        self.lease()
            .revoke(Request::new(LeaseRevokeRequest { lease_id }))
            .await?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        self.kv()
            .put(Request::new(PutRequest {
                key: key.to_string(),
                value: value.to_string(),
                lease_id: lease.unwrap_or(0),
            }))
            .await?;
        Ok(())
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Periodically health-checks the store and publishes state transitions.
async fn probe_connectivity(
    channel: Channel,
    state_tx: watch::Sender<ConnectivityState>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = state_tx.send(ConnectivityState::Shutdown);
                return;
            }
            _ = ticker.tick() => {}
        }

        let mut health = HealthClient::new(channel.clone());
        let request = Request::new(HealthCheckRequest {
            service: String::new(),
        });
        let state = match health.check(request).await {
            Ok(response) => {
                if response.into_inner().status == ServingStatus::Serving as i32 {
                    ConnectivityState::Ready
                } else {
                    ConnectivityState::TransientFailure
                }
            }
            Err(status) => {
                debug!(error = %status, "health probe failed");
                ConnectivityState::TransientFailure
            }
        };

        state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Accepts either a bare `host:port` or an address that already carries a
/// scheme, and normalizes it to the scheme the channel needs.
pub(crate) fn address_str(addr: &str, scheme: &str) -> String {
    let normalized = addr
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    format!("{scheme}://{normalized}")
}
