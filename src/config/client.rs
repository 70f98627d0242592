use std::time::Duration;

/// Connection and request tuning for the coordination store client.
///
/// # Default Configuration
/// - Connect Timeout: 1s
/// - Request Timeout: 3s
/// - Compression: disabled
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time limit for establishing a TCP/TLS connection
    pub connect_timeout: Duration,

    /// Time limit for a single unary request (range reads, lease calls).
    /// Watch and keepalive streams are intentionally unbounded.
    pub request_timeout: Duration,

    /// OS-level TCP keepalive
    pub tcp_keepalive: Duration,

    /// HTTP/2 PING interval keeping long-lived streams open across
    /// idle middleboxes
    pub http2_keepalive_interval: Duration,

    /// How long to wait for a PING acknowledgement before the
    /// connection is considered dead
    pub http2_keepalive_timeout: Duration,

    /// How often the background prober health-checks the store
    pub health_probe_interval: Duration,

    /// Enable gzip on RPC payloads
    pub enable_compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(3),
            tcp_keepalive: Duration::from_secs(300),
            http2_keepalive_interval: Duration::from_secs(60),
            http2_keepalive_timeout: Duration::from_secs(20),
            health_probe_interval: Duration::from_secs(2),
            enable_compression: false,
        }
    }
}
