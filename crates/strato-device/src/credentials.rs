//! Transport credential management.
//!
//! The session asks a [`CredentialsProvider`] for the broker URL and TLS
//! material before every connection attempt, including reconnections, so
//! expired certificates are renewed without tearing the client down.
//!
//! [`PairingCredentials`] is the production provider: it persists the
//! signed certificate under the device's crypto directory, checks its
//! validity window locally and against the pairing API, and submits the
//! configured CSR when a new certificate is needed. [`StaticCredentials`]
//! serves deployments where broker address and TLS material are
//! provisioned out of band, and tests.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::pairing::PairingClient;

/// TLS material handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportCredentials {
    pub client_cert_pem: String,
    pub private_key_pem: String,
}

/// Source of the broker address and TLS material.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Whether this provider has enough material to attempt a connection.
    fn is_configured(&self) -> bool;

    /// Return valid TLS material, renewing it when needed. `None` means
    /// the transport connects without mutual TLS.
    async fn ensure_valid(&self) -> DeviceResult<Option<TransportCredentials>>;

    /// The broker URL to connect to.
    async fn broker_url(&self) -> DeviceResult<Url>;
}

/// On-disk storage for the signed client certificate.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn cert_path(&self) -> PathBuf {
        self.dir.join("device.crt")
    }

    /// Load the stored certificate, if any.
    pub fn load(&self) -> DeviceResult<Option<String>> {
        match std::fs::read_to_string(self.cert_path()) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeviceError::Credentials(format!(
                "reading stored certificate: {e}"
            ))),
        }
    }

    /// Persist a certificate, creating the directory if needed.
    pub fn save(&self, pem: &str) -> DeviceResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| DeviceError::Credentials(format!("creating crypto dir: {e}")))?;
        std::fs::write(self.cert_path(), pem)
            .map_err(|e| DeviceError::Credentials(format!("storing certificate: {e}")))
    }

    /// Remove the stored certificate. Missing files are fine.
    pub fn clear(&self) -> DeviceResult<()> {
        match std::fs::remove_file(self.cert_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeviceError::Credentials(format!(
                "removing stored certificate: {e}"
            ))),
        }
    }

    pub fn exists(&self) -> bool {
        self.cert_path().is_file()
    }
}

/// Provider backed by the pairing API.
pub struct PairingCredentials {
    client: PairingClient,
    store: CertificateStore,
    credentials_secret: Option<String>,
    private_key_pem: Option<String>,
    csr_pem: Option<String>,
}

impl PairingCredentials {
    pub fn new(config: &DeviceConfig) -> DeviceResult<Self> {
        let client = PairingClient::new(config)?;
        Ok(Self {
            client,
            store: CertificateStore::new(config.crypto_dir()),
            credentials_secret: config.credentials_secret.clone(),
            private_key_pem: config.private_key_pem.clone(),
            csr_pem: config.csr_pem.clone(),
        })
    }

    fn secret(&self) -> DeviceResult<&str> {
        self.credentials_secret
            .as_deref()
            .ok_or_else(|| DeviceError::Credentials("credentials secret is not set".to_string()))
    }

    async fn renew(&self, key: &str) -> DeviceResult<TransportCredentials> {
        let csr = self.csr_pem.as_deref().ok_or_else(|| {
            DeviceError::Credentials("certificate renewal needs a CSR".to_string())
        })?;
        let cert = self.client.obtain_certificate(self.secret()?, csr).await?;
        self.store.save(&cert)?;
        debug!("obtained new client certificate");
        Ok(TransportCredentials {
            client_cert_pem: cert,
            private_key_pem: key.to_string(),
        })
    }
}

#[async_trait]
impl CredentialsProvider for PairingCredentials {
    fn is_configured(&self) -> bool {
        self.credentials_secret.is_some() && self.private_key_pem.is_some()
    }

    async fn ensure_valid(&self) -> DeviceResult<Option<TransportCredentials>> {
        let key = self
            .private_key_pem
            .clone()
            .ok_or_else(|| DeviceError::Credentials("private key is not set".to_string()))?;

        if let Some(cert) = self.store.load()? {
            if cert_is_currently_valid(&cert) {
                match self.client.verify_certificate(self.secret()?, &cert).await {
                    Ok(true) => {
                        return Ok(Some(TransportCredentials {
                            client_cert_pem: cert,
                            private_key_pem: key,
                        }));
                    }
                    Ok(false) => debug!("stored certificate rejected by pairing, renewing"),
                    Err(e) => {
                        // Pairing may be unreachable while the broker is
                        // up. Keep the locally valid certificate.
                        warn!("certificate verification unavailable: {e}");
                        return Ok(Some(TransportCredentials {
                            client_cert_pem: cert,
                            private_key_pem: key,
                        }));
                    }
                }
            } else {
                debug!("stored certificate outside its validity window");
            }
        }

        self.renew(&key).await.map(Some)
    }

    async fn broker_url(&self) -> DeviceResult<Url> {
        let url = self.client.broker_url(self.secret()?).await?;
        Url::parse(&url).map_err(|e| {
            DeviceError::Credentials(format!("pairing returned invalid broker URL {url}: {e}"))
        })
    }
}

/// Provider with a fixed broker URL and optional pre-provisioned TLS
/// material.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    broker_url: Url,
    credentials: Option<TransportCredentials>,
}

impl StaticCredentials {
    pub fn new(broker_url: Url) -> Self {
        Self {
            broker_url,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: TransportCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    fn is_configured(&self) -> bool {
        true
    }

    async fn ensure_valid(&self) -> DeviceResult<Option<TransportCredentials>> {
        Ok(self.credentials.clone())
    }

    async fn broker_url(&self) -> DeviceResult<Url> {
        Ok(self.broker_url.clone())
    }
}

/// Check the certificate's validity window against the current time.
/// Anything unparseable counts as invalid.
fn cert_is_currently_valid(pem: &str) -> bool {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let ders = match rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>() {
        Ok(ders) => ders,
        Err(_) => return false,
    };
    let Some(der) = ders.first() else {
        return false;
    };
    match X509Certificate::from_der(der.as_ref()) {
        Ok((_, cert)) => cert.validity().is_valid(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path().join("crypto"));

        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());

        store.save("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").unwrap();
        assert!(store.exists());
        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.contains("BEGIN CERTIFICATE"));

        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }

    #[test]
    fn garbage_pem_is_not_valid() {
        assert!(!cert_is_currently_valid("not a pem"));
        assert!(!cert_is_currently_valid(
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"
        ));
    }

    #[tokio::test]
    async fn static_provider_returns_its_material() {
        let url = Url::parse("mqtt://localhost:1883").unwrap();
        let provider = StaticCredentials::new(url.clone()).with_credentials(TransportCredentials {
            client_cert_pem: "cert".to_string(),
            private_key_pem: "key".to_string(),
        });

        assert!(provider.is_configured());
        assert_eq!(provider.broker_url().await.unwrap(), url);
        let creds = provider.ensure_valid().await.unwrap().unwrap();
        assert_eq!(creds.client_cert_pem, "cert");
    }
}
