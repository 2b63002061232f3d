//! Device client configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{DeviceError, DeviceResult};
use crate::retry::RetryPolicy;

/// Configuration for one device instance.
///
/// `realm`, `device_id`, `pairing_url` and `persistency_dir` identify the
/// device; everything else has workable defaults. TLS brokers additionally
/// need the key/CSR pair and the broker CA certificate.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Platform realm this device belongs to.
    pub realm: String,
    /// Unique device identifier within the realm.
    pub device_id: String,
    /// Base URL of the pairing API.
    pub pairing_url: String,
    /// Directory for persisted state (credentials, property cache).
    pub persistency_dir: PathBuf,
    /// Secret returned by device registration. Required until a client
    /// certificate has been obtained and persisted.
    pub credentials_secret: Option<String>,
    /// PEM private key matching `csr_pem`, used for mutual TLS.
    pub private_key_pem: Option<String>,
    /// PEM certificate signing request submitted when (re)obtaining a
    /// client certificate.
    pub csr_pem: Option<String>,
    /// PEM CA bundle used to verify the broker certificate.
    pub broker_ca_pem: Option<String>,
    /// MQTT keep-alive interval.
    pub keepalive: Duration,
    /// Bound for transport and pairing I/O waits.
    pub timeout: Duration,
    /// Reconnection backoff curve.
    pub retry: RetryPolicy,
}

impl DeviceConfig {
    /// Create a configuration from the required identity fields.
    pub fn new(
        realm: impl Into<String>,
        device_id: impl Into<String>,
        pairing_url: impl Into<String>,
        persistency_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            realm: realm.into(),
            device_id: device_id.into(),
            pairing_url: pairing_url.into(),
            persistency_dir: persistency_dir.into(),
            credentials_secret: None,
            private_key_pem: None,
            csr_pem: None,
            broker_ca_pem: None,
            keepalive: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the credentials secret obtained at registration.
    pub fn with_credentials_secret(mut self, secret: impl Into<String>) -> Self {
        self.credentials_secret = Some(secret.into());
        self
    }

    /// Set the device private key and certificate signing request (PEM).
    pub fn with_key_and_csr(
        mut self,
        private_key_pem: impl Into<String>,
        csr_pem: impl Into<String>,
    ) -> Self {
        self.private_key_pem = Some(private_key_pem.into());
        self.csr_pem = Some(csr_pem.into());
        self
    }

    /// Set the CA bundle used to verify the broker certificate (PEM).
    pub fn with_broker_ca(mut self, ca_pem: impl Into<String>) -> Self {
        self.broker_ca_pem = Some(ca_pem.into());
        self
    }

    /// Set the MQTT keep-alive interval.
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the bound for transport and pairing I/O waits.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the reconnection backoff curve.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Structural checks. Performed once when the client is built.
    pub fn validate(&self) -> DeviceResult<()> {
        if self.realm.is_empty() {
            return Err(DeviceError::Configuration("realm must not be empty".into()));
        }
        if self.device_id.is_empty() {
            return Err(DeviceError::Configuration(
                "device_id must not be empty".into(),
            ));
        }
        Url::parse(&self.pairing_url).map_err(|e| {
            DeviceError::Configuration(format!("invalid pairing URL {}: {e}", self.pairing_url))
        })?;
        Ok(())
    }

    /// Directory holding this device's credentials.
    pub fn crypto_dir(&self) -> PathBuf {
        self.persistency_dir.join(&self.device_id).join("crypto")
    }

    /// Default path of the property cache database.
    pub fn property_db_path(&self) -> PathBuf {
        self.persistency_dir
            .join(&self.device_id)
            .join("caching")
            .join("properties.redb")
    }
}
