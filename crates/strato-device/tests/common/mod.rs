//! Common test utilities: interface fixtures, a mock-backed client
//! builder and a callback recorder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use strato_device::{
    ConnectionStatus, DeviceBuilder, DeviceClient, DeviceConfig, DeviceEvents, MockHandle,
    MockTransport, PropertyStore, ReceivedData, RetryPolicy, StaticCredentials,
};

pub const REALM: &str = "acme";
pub const DEVICE_ID: &str = "fXumrCeVMrFLvLbPquzQog";

/// Device-owned individual datastream.
pub const READINGS_JSON: &str = r#"{
    "interface_name": "org.demo.Readings",
    "version_major": 1,
    "version_minor": 0,
    "type": "datastream",
    "ownership": "device",
    "mappings": [
        { "endpoint": "/value", "type": "double" },
        { "endpoint": "/count", "type": "integer", "reliability": "unique" }
    ]
}"#;

/// Device-owned properties.
pub const SETTINGS_JSON: &str = r#"{
    "interface_name": "org.demo.Settings",
    "version_major": 1,
    "version_minor": 0,
    "type": "properties",
    "ownership": "device",
    "mappings": [
        { "endpoint": "/enabled", "type": "boolean", "allow_unset": true },
        { "endpoint": "/name", "type": "string" }
    ]
}"#;

/// Server-owned properties.
pub const SERVER_SETTINGS_JSON: &str = r#"{
    "interface_name": "org.demo.ServerSettings",
    "version_major": 1,
    "version_minor": 0,
    "type": "properties",
    "ownership": "server",
    "mappings": [
        { "endpoint": "/mode", "type": "string", "allow_unset": true },
        { "endpoint": "/limit", "type": "integer", "allow_unset": true }
    ]
}"#;

/// Server-owned individual datastream.
pub const COMMANDS_JSON: &str = r#"{
    "interface_name": "org.demo.Commands",
    "version_major": 1,
    "version_minor": 0,
    "type": "datastream",
    "ownership": "server",
    "mappings": [
        { "endpoint": "/cmd", "type": "string" }
    ]
}"#;

/// Server-owned object-aggregated datastream.
pub const DISPLAY_JSON: &str = r#"{
    "interface_name": "org.demo.Display",
    "version_major": 1,
    "version_minor": 0,
    "type": "datastream",
    "ownership": "server",
    "aggregation": "object",
    "mappings": [
        { "endpoint": "/display/line1", "type": "string" },
        { "endpoint": "/display/line2", "type": "string" }
    ]
}"#;

/// Device-owned object-aggregated datastream.
pub const POSITION_JSON: &str = r#"{
    "interface_name": "org.demo.Position",
    "version_major": 1,
    "version_minor": 0,
    "type": "datastream",
    "ownership": "device",
    "aggregation": "object",
    "mappings": [
        { "endpoint": "/pos/lat", "type": "double" },
        { "endpoint": "/pos/lon", "type": "double" }
    ]
}"#;

/// Route session logs to the test output. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Backoff tuned so reconnect tests finish in milliseconds.
pub fn fast_retry() -> RetryPolicy {
    let mut retry = RetryPolicy::default()
        .with_initial_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(100));
    retry.add_jitter = false;
    retry
}

pub fn test_config() -> DeviceConfig {
    DeviceConfig::new(
        REALM,
        DEVICE_ID,
        "https://pairing.example.com",
        "/tmp/strato-device-tests",
    )
    .with_timeout(Duration::from_secs(2))
    .with_retry(fast_retry())
}

/// Build a client on a mock transport with static credentials and a
/// volatile store.
pub async fn build_with_config(
    config: DeviceConfig,
    interfaces: &[&str],
    events: Option<Arc<dyn DeviceEvents>>,
) -> (DeviceClient, MockHandle) {
    let (transport, handle) = MockTransport::new();
    let mut builder = DeviceBuilder::new(config)
        .credentials(Arc::new(StaticCredentials::new(
            Url::parse("mqtt://broker.local:1883").unwrap(),
        )))
        .transport(Box::new(transport))
        .store(PropertyStore::in_memory());
    for json in interfaces {
        builder = builder.interface_json(json).unwrap();
    }
    if let Some(events) = events {
        builder = builder.events(events);
    }
    (builder.build().await.unwrap(), handle)
}

pub async fn build_client(interfaces: &[&str]) -> (DeviceClient, MockHandle) {
    build_with_config(test_config(), interfaces, None).await
}

pub async fn build_client_with_events(
    interfaces: &[&str],
    events: Arc<dyn DeviceEvents>,
) -> (DeviceClient, MockHandle) {
    build_with_config(test_config(), interfaces, Some(events)).await
}

pub async fn connected_client(interfaces: &[&str]) -> (DeviceClient, MockHandle) {
    let (client, handle) = build_client(interfaces).await;
    client.connect().await.unwrap();
    (client, handle)
}

/// Give the session task a moment to process pushed events.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn wait_for_status(client: &DeviceClient, status: ConnectionStatus) {
    for _ in 0..200 {
        if client.status().await == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("device never reached {status:?}");
}

pub async fn wait_for_attempts(handle: &MockHandle, attempts: u32) {
    for _ in 0..200 {
        if handle.connect_attempts().await >= attempts {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transport never reached {attempts} connect attempts");
}

pub fn data_topic(interface: &str, path: &str) -> String {
    format!("{REALM}/{DEVICE_ID}/{interface}{path}")
}

pub fn control_topic(name: &str) -> String {
    format!("{REALM}/{DEVICE_ID}/control/{name}")
}

pub fn base_topic() -> String {
    format!("{REALM}/{DEVICE_ID}")
}

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Connected {
        session_present: bool,
    },
    Disconnected {
        reason: String,
    },
    Data {
        interface: String,
        path: String,
        data: ReceivedData,
        timestamp: Option<DateTime<Utc>>,
    },
}

/// [`DeviceEvents`] handler that records every invocation.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Recorded>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn data_events(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Recorded::Data { .. }))
            .collect()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DeviceEvents for Recorder {
    async fn on_connected(&self, session_present: bool) {
        self.push(Recorded::Connected { session_present });
    }

    async fn on_disconnected(&self, reason: &str) {
        self.push(Recorded::Disconnected {
            reason: reason.to_string(),
        });
    }

    async fn on_data_received(
        &self,
        interface: &str,
        path: &str,
        data: ReceivedData,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.push(Recorded::Data {
            interface: interface.to_string(),
            path: path.to_string(),
            data,
            timestamp,
        });
    }
}
