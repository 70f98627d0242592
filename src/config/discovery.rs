use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::TlsOptions;
use crate::Error;
use crate::Result;

/// Where to reach the coordination store and which key to operate on.
///
/// Typically deserialized from an application config file:
///
/// ```toml
/// hosts = ["node1:9081", "node2:9082"]
/// key = "svc/users"
///
/// [tls]
/// ca_file = "/etc/certs/ca.pem"
/// cert_file = "/etc/certs/client.pem"
/// key_file = "/etc/certs/client.key"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Coordination store endpoints
    pub hosts: Vec<String>,

    /// Key (prefix) to monitor or publish under
    pub key: String,

    /// Client certificate material; plaintext connection when absent
    #[serde(default)]
    pub tls: Option<TlsOptions>,
}

impl DiscoveryConfig {
    /// Loads and validates a configuration file (TOML).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        let conf: DiscoveryConfig = settings.try_deserialize().map_err(Error::Config)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `Error::Config` when the host list or the key is empty.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "empty coordination store hosts".into(),
            )));
        }
        if self.key.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "empty coordination store key".into(),
            )));
        }
        Ok(())
    }
}
