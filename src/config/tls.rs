use std::fs;

use serde::Deserialize;
use serde::Serialize;
use tonic::transport::Certificate;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Identity;

use crate::Error;
use crate::Result;

/// Certificate material for a TLS-secured coordination store.
///
/// Paths are read once, when the owning cluster (or publisher connection) is
/// first constructed. Unreadable material is an explicit construction-time
/// error rather than a connection that fails later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Certificate Authority root certificate (PEM)
    pub ca_file: String,

    /// Client certificate chain (PEM)
    pub cert_file: String,

    /// Client private key (PEM)
    pub key_file: String,
}

impl TlsOptions {
    /// Reads the certificate material into a tonic client TLS config.
    ///
    /// # Errors
    /// Returns [`Error::CredentialLoad`] naming the unreadable path.
    pub(crate) fn load(&self) -> Result<ClientTlsConfig> {
        let ca = read_pem(&self.ca_file)?;
        let cert = read_pem(&self.cert_file)?;
        let key = read_pem(&self.key_file)?;

        Ok(ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(cert, key)))
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| Error::CredentialLoad {
        path: path.to_string(),
        source,
    })
}
