//! MQTT transport backed by rumqttc.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DeviceConfig;
use crate::credentials::CredentialsProvider;
use crate::error::{DeviceError, DeviceResult};
use crate::transport::{Transport, TransportEvent, TransportMessage};

/// Transport connecting to an MQTT broker with the address and TLS
/// material supplied by a [`CredentialsProvider`].
pub struct MqttTransport {
    client_id: String,
    keepalive: Duration,
    broker_ca_pem: Option<String>,
    provider: Arc<dyn CredentialsProvider>,
    client: Option<rumqttc::AsyncClient>,
    pump: Option<JoinHandle<()>>,
}

impl MqttTransport {
    /// The MQTT client identifier is `{realm}/{device_id}`, matching the
    /// topic base.
    pub fn new(config: &DeviceConfig, provider: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            client_id: format!("{}/{}", config.realm, config.device_id),
            keepalive: config.keepalive,
            broker_ca_pem: config.broker_ca_pem.clone(),
            provider,
            client: None,
            pump: None,
        }
    }

    fn client(&self) -> DeviceResult<&rumqttc::AsyncClient> {
        self.client.as_ref().ok_or(DeviceError::Disconnected)
    }
}

fn qos_level(qos: u8) -> rumqttc::QoS {
    match qos {
        0 => rumqttc::QoS::AtMostOnce,
        1 => rumqttc::QoS::AtLeastOnce,
        _ => rumqttc::QoS::ExactlyOnce,
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> DeviceResult<mpsc::Receiver<TransportEvent>> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.client = None;

        let broker_url = self.provider.broker_url().await?;
        let credentials = self.provider.ensure_valid().await?;

        let host = broker_url
            .host_str()
            .ok_or_else(|| {
                DeviceError::Configuration(format!("broker URL {broker_url} has no host"))
            })?
            .to_string();
        let use_tls = match broker_url.scheme() {
            "mqtts" | "ssl" => true,
            "mqtt" | "tcp" => false,
            other => {
                return Err(DeviceError::Configuration(format!(
                    "unsupported broker scheme {other}"
                )))
            }
        };
        let port = broker_url
            .port()
            .unwrap_or(if use_tls { 8883 } else { 1883 });

        let mut mqttoptions = rumqttc::MqttOptions::new(&self.client_id, &host, port);
        mqttoptions.set_keep_alive(self.keepalive);
        // The broker keeps subscriptions and queued messages across
        // reconnections; session_present in the ConnAck tells us whether
        // the full bootstrap is needed.
        mqttoptions.set_clean_session(false);

        if use_tls {
            let ca = self.broker_ca_pem.as_ref().ok_or_else(|| {
                DeviceError::Configuration(
                    "TLS broker requires a CA certificate, see DeviceConfig::with_broker_ca"
                        .to_string(),
                )
            })?;
            let client_auth = credentials.map(|c| {
                (
                    c.client_cert_pem.into_bytes(),
                    c.private_key_pem.into_bytes(),
                )
            });
            mqttoptions.set_transport(rumqttc::Transport::Tls(
                rumqttc::TlsConfiguration::Simple {
                    ca: ca.clone().into_bytes(),
                    alpn: None,
                    client_auth,
                },
            ));
        }

        let (client, mut eventloop) = rumqttc::AsyncClient::new(mqttoptions, 16);
        let (event_tx, event_rx) = mpsc::channel(16);

        debug!(broker = %broker_url, client_id = %self.client_id, "opening MQTT link");
        let pump = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(ack))) => {
                        let event = TransportEvent::Connected {
                            session_present: ack.session_present,
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                        let event = TransportEvent::Message(TransportMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT link failed: {e}");
                        let event = TransportEvent::Disconnected {
                            reason: e.to_string(),
                        };
                        let _ = event_tx.send(event).await;
                        break;
                    }
                }
            }
        });

        self.client = Some(client);
        self.pump = Some(pump);
        Ok(event_rx)
    }

    async fn disconnect(&mut self) -> DeviceResult<()> {
        if let Some(client) = self.client.take() {
            // Best effort DISCONNECT packet; the link may already be gone.
            let _ = client.disconnect().await;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> DeviceResult<()> {
        self.client()?
            .publish(topic, qos_level(qos), retain, payload)
            .await
            .map_err(|e| DeviceError::Transport(format!("publish to {topic} failed: {e}")))
    }

    async fn subscribe(&mut self, topic: &str, qos: u8) -> DeviceResult<()> {
        self.client()?
            .subscribe(topic, qos_level(qos))
            .await
            .map_err(|e| DeviceError::Transport(format!("subscribe to {topic} failed: {e}")))
    }

    async fn unsubscribe(&mut self, topic: &str) -> DeviceResult<()> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| DeviceError::Transport(format!("unsubscribe from {topic} failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels_map_onto_mqtt() {
        assert_eq!(qos_level(0), rumqttc::QoS::AtMostOnce);
        assert_eq!(qos_level(1), rumqttc::QoS::AtLeastOnce);
        assert_eq!(qos_level(2), rumqttc::QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn operations_without_a_link_report_disconnected() {
        let config = DeviceConfig::new("acme", "dev-1", "https://p.example.com", "/tmp/strato");
        let provider = Arc::new(crate::credentials::StaticCredentials::new(
            url::Url::parse("mqtt://localhost:1883").unwrap(),
        ));
        let mut transport = MqttTransport::new(&config, provider);

        let err = transport.publish("t", Vec::new(), 2, false).await.unwrap_err();
        assert!(matches!(err, DeviceError::Disconnected));
    }
}
