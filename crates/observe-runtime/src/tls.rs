//! Client TLS material for OTLP exporters.
//!
//! Material is read from disk once, when the exporter bundle is built, so a
//! reload with a broken certificate path fails before anything is swapped.

use crate::error::{Error, Result};
use observe_config::TlsConfig;
use std::path::Path;
use std::time::Duration;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

const CERTIFICATE_LABEL: &str = "-----BEGIN CERTIFICATE-----";
const PRIVATE_KEY_MARKER: &str = "PRIVATE KEY-----";

/// PEM material loaded from a [`TlsConfig`].
#[derive(Clone)]
pub struct TlsMaterial {
    ca: Option<Vec<u8>>,
    identity: Option<(Vec<u8>, Vec<u8>)>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &self.ca.is_some())
            .field("client_identity", &self.identity.is_some())
            .finish()
    }
}

impl TlsMaterial {
    /// Reads the configured files.
    ///
    /// Returns `Ok(None)` when no TLS section is configured, which means
    /// plaintext or system defaults with no client certificate.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when only one of `cert_file` and
    /// `key_file` is set, and a construction error when a file cannot be
    /// read or holds no PEM block of the expected kind.
    pub fn load(config: &TlsConfig) -> Result<Option<Self>> {
        if config.is_empty() {
            return Ok(None);
        }

        let identity = match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => Some((
                read_pem(cert, CERTIFICATE_LABEL)?,
                read_pem(key, PRIVATE_KEY_MARKER)?,
            )),
            (None, None) => None,
            _ => {
                return Err(Error::invalid(
                    "exporters.otlp.tls",
                    "cert_file and key_file must both be set",
                ));
            }
        };

        let ca = match &config.ca_file {
            Some(path) => Some(read_pem(path, CERTIFICATE_LABEL)?),
            None => None,
        };

        Ok(Some(Self { ca, identity }))
    }

    /// Whether a client certificate is configured.
    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Renders the material as a tonic client TLS configuration.
    pub fn grpc_config(&self) -> ClientTlsConfig {
        let mut tls = ClientTlsConfig::new();
        if let Some(ca) = &self.ca {
            tls = tls.ca_certificate(Certificate::from_pem(ca));
        }
        if let Some((cert, key)) = &self.identity {
            tls = tls.identity(Identity::from_pem(cert, key));
        }
        tls
    }

    /// Builds a blocking HTTP client carrying the material.
    ///
    /// # Errors
    ///
    /// Returns a construction error when the PEM data is rejected by the
    /// TLS backend.
    pub fn http_client(&self, timeout: Duration) -> Result<reqwest::blocking::Client> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);

        if let Some(ca) = &self.ca {
            let certificate = reqwest::Certificate::from_pem(ca)
                .map_err(|e| Error::construction("tls material", e))?;
            builder = builder.add_root_certificate(certificate);
        }

        if let Some((cert, key)) = &self.identity {
            let identity = reqwest::Identity::from_pem(&[cert.as_slice(), key.as_slice()].concat())
                .map_err(|e| Error::construction("tls material", e))?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| Error::construction("otlp http client", e))
    }
}

fn read_pem(path: &Path, marker: &str) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| {
        Error::construction(
            "tls material",
            format!("failed to read {}: {e}", path.display()),
        )
    })?;

    if !String::from_utf8_lossy(&bytes).contains(marker) {
        return Err(Error::construction(
            "tls material",
            format!("{} contains no PEM data", path.display()),
        ));
    }

    Ok(bytes)
}
