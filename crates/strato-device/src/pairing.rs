//! Pairing API client.
//!
//! The pairing service provisions device credentials: it registers devices,
//! signs certificate requests and hands out the broker URL. All endpoints
//! wrap request and response bodies in a `data` envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::DeviceConfig;

/// Errors from the pairing API.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("pairing authorization rejected: {0}")]
    Authorization(String),

    #[error("device is already registered")]
    AlreadyRegistered,

    #[error("pairing API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected pairing response: {0}")]
    Response(String),
}

/// Result type for pairing operations.
pub type PairingResult<T> = Result<T, PairingError>;

/// Client for one device's pairing endpoints.
#[derive(Debug, Clone)]
pub struct PairingClient {
    base: String,
    realm: String,
    device_id: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<T> {
    data: T,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    hw_id: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    credentials_secret: String,
}

#[derive(Serialize)]
struct CsrRequest<'a> {
    csr: &'a str,
}

#[derive(Deserialize)]
struct CertificateResponse {
    client_crt: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    client_crt: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    protocols: ProtocolInfo,
}

#[derive(Deserialize)]
struct ProtocolInfo {
    strato_mqtt_v1: BrokerInfo,
}

#[derive(Deserialize)]
struct BrokerInfo {
    broker_url: String,
}

impl PairingClient {
    /// Create a client from the device configuration.
    pub fn new(config: &DeviceConfig) -> PairingResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            base: config.pairing_url.trim_end_matches('/').to_string(),
            realm: config.realm.clone(),
            device_id: config.device_id.clone(),
            http_client,
        })
    }

    fn agent_url(&self) -> String {
        format!("{}/v1/{}/agent/devices", self.base, self.realm)
    }

    fn device_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/{}/devices/{}{}",
            self.base, self.realm, self.device_id, suffix
        )
    }

    /// Register this device, authenticated with a registration token.
    /// Returns the credentials secret used by all other endpoints.
    pub async fn register_device(&self, token: &str) -> PairingResult<String> {
        let response = self
            .http_client
            .post(self.agent_url())
            .bearer_auth(token)
            .json(&ApiRequest {
                data: RegisterRequest {
                    hw_id: &self.device_id,
                },
            })
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 201 => {
                let body: ApiResponse<RegisterResponse> = response.json().await?;
                debug!(device_id = %self.device_id, "device registered");
                Ok(body.data.credentials_secret)
            }
            401 | 403 => Err(PairingError::Authorization(
                "registration token rejected".to_string(),
            )),
            422 => Err(PairingError::AlreadyRegistered),
            status => Err(PairingError::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Submit a certificate signing request and return the signed client
    /// certificate (PEM).
    pub async fn obtain_certificate(&self, secret: &str, csr: &str) -> PairingResult<String> {
        let url = self.device_url("/protocols/strato_mqtt_v1/credentials");
        let response = self
            .http_client
            .post(url)
            .bearer_auth(secret)
            .json(&ApiRequest {
                data: CsrRequest { csr },
            })
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 201 => {
                let body: ApiResponse<CertificateResponse> = response.json().await?;
                debug!(device_id = %self.device_id, "client certificate issued");
                Ok(body.data.client_crt)
            }
            401 | 403 => Err(PairingError::Authorization(
                "credentials secret rejected".to_string(),
            )),
            status => Err(PairingError::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Ask the pairing service whether a client certificate is still valid.
    pub async fn verify_certificate(&self, secret: &str, cert_pem: &str) -> PairingResult<bool> {
        let url = self.device_url("/protocols/strato_mqtt_v1/credentials/verify");
        let response = self
            .http_client
            .post(url)
            .bearer_auth(secret)
            .json(&ApiRequest {
                data: VerifyRequest {
                    client_crt: cert_pem,
                },
            })
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 201 => {
                let body: ApiResponse<VerifyResponse> = response.json().await?;
                if !body.data.valid {
                    debug!(
                        device_id = %self.device_id,
                        cause = body.data.cause.as_deref().unwrap_or("unknown"),
                        "certificate reported invalid"
                    );
                }
                Ok(body.data.valid)
            }
            401 | 403 => Err(PairingError::Authorization(
                "credentials secret rejected".to_string(),
            )),
            status => Err(PairingError::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Fetch the MQTT broker URL assigned to this device.
    pub async fn broker_url(&self, secret: &str) -> PairingResult<String> {
        let response = self
            .http_client
            .get(self.device_url(""))
            .bearer_auth(secret)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let body: ApiResponse<StatusResponse> = response.json().await?;
                Ok(body.data.protocols.strato_mqtt_v1.broker_url)
            }
            401 | 403 => Err(PairingError::Authorization(
                "credentials secret rejected".to_string(),
            )),
            status => Err(PairingError::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> PairingClient {
        let config = DeviceConfig::new(
            "acme",
            "dev-1",
            "https://pairing.example.com/",
            "/tmp/strato",
        )
        .with_timeout(Duration::from_secs(5));
        PairingClient::new(&config).unwrap()
    }

    #[test]
    fn urls_follow_the_pairing_layout() {
        let c = client();
        assert_eq!(
            c.agent_url(),
            "https://pairing.example.com/v1/acme/agent/devices"
        );
        assert_eq!(
            c.device_url("/protocols/strato_mqtt_v1/credentials"),
            "https://pairing.example.com/v1/acme/devices/dev-1/protocols/strato_mqtt_v1/credentials"
        );
        assert_eq!(
            c.device_url(""),
            "https://pairing.example.com/v1/acme/devices/dev-1"
        );
    }

    #[test]
    fn responses_unwrap_the_data_envelope() {
        let body: ApiResponse<RegisterResponse> =
            serde_json::from_str(r#"{"data":{"credentials_secret":"abc"}}"#).unwrap();
        assert_eq!(body.data.credentials_secret, "abc");

        let body: ApiResponse<VerifyResponse> =
            serde_json::from_str(r#"{"data":{"valid":false,"cause":"EXPIRED"}}"#).unwrap();
        assert!(!body.data.valid);
        assert_eq!(body.data.cause.as_deref(), Some("EXPIRED"));

        let body: ApiResponse<StatusResponse> = serde_json::from_str(
            r#"{"data":{"protocols":{"strato_mqtt_v1":{"broker_url":"mqtts://b.example.com:8883"}}}}"#,
        )
        .unwrap();
        assert_eq!(
            body.data.protocols.strato_mqtt_v1.broker_url,
            "mqtts://b.example.com:8883"
        );
    }
}
