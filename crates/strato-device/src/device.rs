//! Device client facade.
//!
//! [`DeviceBuilder`] assembles the pieces (configuration, interfaces,
//! property store, credentials, transport, callbacks) and spawns the
//! session task; [`DeviceClient`] is the cheap-to-clone handle the
//! application keeps.
//!
//! Outgoing data is validated here, against the registry, before it is
//! handed to the session: ownership, endpoint match, type shape and
//! timestamp policy. Validation failures are reported synchronously and
//! never reach the wire.

use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use strato_interfaces::{Interface, InterfaceError, Registry, Value};
use strato_store::{PropertyStore, StoredProp};

use crate::config::DeviceConfig;
use crate::credentials::{CredentialsProvider, PairingCredentials};
use crate::error::{DeviceError, DeviceResult};
use crate::payload;
use crate::session::{
    ConnectionStatus, DeviceEvents, NullEvents, Outbound, Session, SessionHandle,
};
use crate::topic::TopicSpace;
use crate::transport::{MqttTransport, Transport};

/// Builder for a [`DeviceClient`].
pub struct DeviceBuilder {
    config: DeviceConfig,
    interfaces: Vec<Interface>,
    store: Option<PropertyStore>,
    transport: Option<Box<dyn Transport>>,
    provider: Option<Arc<dyn CredentialsProvider>>,
    handler: Option<Arc<dyn DeviceEvents>>,
}

impl DeviceBuilder {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            interfaces: Vec::new(),
            store: None,
            transport: None,
            provider: None,
            handler: None,
        }
    }

    /// Register an interface.
    pub fn interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Register an interface from its JSON definition.
    pub fn interface_json(self, json: &str) -> DeviceResult<Self> {
        let interface = Interface::from_json(json)?;
        Ok(self.interface(interface))
    }

    /// Register every `.json` interface definition in a directory.
    pub fn interface_directory(mut self, dir: impl AsRef<Path>) -> DeviceResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            DeviceError::Configuration(format!("reading interface directory {dir:?}: {e}"))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                DeviceError::Configuration(format!("reading interface directory {dir:?}: {e}"))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let json = std::fs::read_to_string(&path).map_err(|e| {
                DeviceError::Configuration(format!("reading interface file {path:?}: {e}"))
            })?;
            self.interfaces.push(Interface::from_json(&json)?);
        }
        Ok(self)
    }

    /// Use a specific property store instead of the default embedded
    /// database under the persistency directory.
    pub fn store(mut self, store: PropertyStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific credentials provider instead of the pairing API.
    pub fn credentials(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use a specific transport instead of MQTT. Mostly for tests.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bind the application callbacks.
    pub fn events(mut self, handler: Arc<dyn DeviceEvents>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate the configuration, open the store and spawn the session.
    pub async fn build(self) -> DeviceResult<DeviceClient> {
        self.config.validate()?;

        let provider: Arc<dyn CredentialsProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(PairingCredentials::new(&self.config)?),
        };
        if !provider.is_configured() {
            return Err(DeviceError::Configuration(
                "credentials are not configured".to_string(),
            ));
        }

        let store = match self.store {
            Some(store) => store,
            None => {
                let path = self.config.property_db_path();
                PropertyStore::open(path.to_string_lossy().into_owned())?
            }
        };

        let mut registry = Registry::new();
        for interface in self.interfaces {
            if registry.contains(interface.name()) {
                return Err(DeviceError::Configuration(format!(
                    "interface {} registered twice",
                    interface.name()
                )));
            }
            registry.add(interface)?;
        }
        let registry = Arc::new(RwLock::new(registry));

        let topics = TopicSpace::new(&self.config.realm, &self.config.device_id);
        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(MqttTransport::new(&self.config, Arc::clone(&provider))),
        };
        let handler = self.handler.unwrap_or_else(|| Arc::new(NullEvents));

        let session = Session::spawn(
            transport,
            Arc::clone(&registry),
            store.clone(),
            topics.clone(),
            self.config.retry.clone(),
            self.config.timeout,
            handler,
        );

        Ok(DeviceClient {
            realm: self.config.realm,
            device_id: self.config.device_id,
            topics,
            registry,
            store,
            session,
        })
    }
}

/// Handle to one running device instance.
#[derive(Clone)]
pub struct DeviceClient {
    realm: String,
    device_id: String,
    topics: TopicSpace,
    registry: Arc<RwLock<Registry>>,
    store: PropertyStore,
    session: SessionHandle,
}

impl DeviceClient {
    pub fn builder(config: DeviceConfig) -> DeviceBuilder {
        DeviceBuilder::new(config)
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.session.status().await
    }

    pub async fn is_connected(&self) -> bool {
        self.session.status().await == ConnectionStatus::Connected
    }

    /// Connect and run the bootstrap sequence. Returns once the session
    /// is established; afterwards the session reconnects on its own.
    pub async fn connect(&self) -> DeviceResult<()> {
        self.session.connect().await
    }

    /// Tear the connection down. Idempotent, cancels a pending reconnect.
    pub async fn disconnect(&self) -> DeviceResult<()> {
        self.session.disconnect().await
    }

    /// Register an interface. While connected the introspection is
    /// re-announced and server-owned interfaces are subscribed.
    pub async fn add_interface(&self, interface: Interface) -> DeviceResult<()> {
        self.session.add_interface(interface).await
    }

    /// Register an interface from its JSON definition.
    pub async fn add_interface_json(&self, json: &str) -> DeviceResult<()> {
        self.add_interface(Interface::from_json(json)?).await
    }

    /// Remove an interface and every property stored under it. While
    /// connected the introspection is re-announced.
    pub async fn remove_interface(&self, name: &str) -> DeviceResult<()> {
        self.session.remove_interface(name).await
    }

    /// The current introspection string.
    pub async fn introspection(&self) -> String {
        self.registry.read().await.introspection_string()
    }

    /// Names of the registered interfaces.
    pub async fn interface_names(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .iter()
            .map(|iface| iface.name().to_string())
            .collect()
    }

    /// Send an individual value on a device-owned interface. Property
    /// values are persisted before they are published.
    pub async fn send(&self, interface: &str, path: &str, value: Value) -> DeviceResult<()> {
        self.send_with_timestamp(interface, path, value, None).await
    }

    /// [`send`](Self::send) with an explicit timestamp, required by
    /// mappings declaring `explicit_timestamp`.
    pub async fn send_with_timestamp(
        &self,
        interface: &str,
        path: &str,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> DeviceResult<()> {
        let outbound = {
            let registry = self.registry.read().await;
            let iface = registry.resolve(interface)?;
            ensure_device_owned(iface, interface)?;
            let mapping = iface.validate_individual(path, &value, timestamp)?;
            let value = value.widen_for(mapping.mapping_type());
            let topic = self.topics.data(iface.name(), path);
            let encoded = payload::encode_individual(&value, timestamp)?;
            if iface.is_properties() {
                Outbound::PropertySet {
                    interface: iface.name().to_string(),
                    path: path.to_string(),
                    value,
                    version_major: iface.version_major(),
                    topic,
                    payload: encoded,
                }
            } else {
                Outbound::Datastream {
                    topic,
                    payload: encoded,
                    qos: mapping.reliability().qos(),
                }
            }
        };
        self.session.send(outbound).await
    }

    /// Send an object aggregate on a device-owned interface. `pairs`
    /// must cover exactly the mapping leaves under `path`.
    pub async fn send_object(
        &self,
        interface: &str,
        path: &str,
        pairs: Vec<(String, Value)>,
    ) -> DeviceResult<()> {
        self.send_object_with_timestamp(interface, path, pairs, None)
            .await
    }

    /// [`send_object`](Self::send_object) with an explicit timestamp.
    pub async fn send_object_with_timestamp(
        &self,
        interface: &str,
        path: &str,
        pairs: Vec<(String, Value)>,
        timestamp: Option<DateTime<Utc>>,
    ) -> DeviceResult<()> {
        let outbound = {
            let registry = self.registry.read().await;
            let iface = registry.resolve(interface)?;
            ensure_device_owned(iface, interface)?;
            let mapping = iface.validate_object(path, &pairs, timestamp)?;
            let qos = mapping.reliability().qos();

            let mut widened = Vec::with_capacity(pairs.len());
            for (leaf, value) in pairs {
                let leaf_mapping = iface.mapping(&format!("{path}/{leaf}"))?;
                widened.push((leaf, value.widen_for(leaf_mapping.mapping_type())));
            }
            let encoded = payload::encode_object(&widened, timestamp)?;
            Outbound::Datastream {
                topic: self.topics.data(iface.name(), path),
                payload: encoded,
                qos,
            }
        };
        self.session.send(outbound).await
    }

    /// Unset a property. Only legal on property mappings declaring
    /// `allow_unset`; the stored entry is removed and a zero-length
    /// payload is published.
    pub async fn unset_property(&self, interface: &str, path: &str) -> DeviceResult<()> {
        let outbound = {
            let registry = self.registry.read().await;
            let iface = registry.resolve(interface)?;
            ensure_device_owned(iface, interface)?;
            if !iface.is_properties() {
                return Err(InterfaceError::InvalidOperation(format!(
                    "interface {interface} is not a property interface"
                ))
                .into());
            }
            let mapping = iface.mapping(path)?;
            if !mapping.allow_unset() {
                return Err(InterfaceError::InvalidOperation(format!(
                    "{interface}{path} does not allow unset"
                ))
                .into());
            }
            Outbound::PropertyUnset {
                interface: iface.name().to_string(),
                path: path.to_string(),
                topic: self.topics.data(iface.name(), path),
            }
        };
        self.session.send(outbound).await
    }

    /// The stored value of one property, if set. Entries persisted under
    /// an older major version are evicted, not returned.
    pub async fn property(&self, interface: &str, path: &str) -> DeviceResult<Option<Value>> {
        let version_major = {
            let registry = self.registry.read().await;
            registry.resolve(interface)?.version_major()
        };
        Ok(self.store.load(interface, path, version_major)?)
    }

    /// Every stored property of one interface.
    pub async fn interface_properties(&self, interface: &str) -> DeviceResult<Vec<StoredProp>> {
        Ok(self.store.load_all(Some(interface))?)
    }

    /// The underlying property store.
    pub fn property_store(&self) -> &PropertyStore {
        &self.store
    }
}

fn ensure_device_owned(iface: &Interface, name: &str) -> DeviceResult<()> {
    if iface.is_server_owned() {
        return Err(InterfaceError::InvalidOperation(format!(
            "interface {name} is server-owned"
        ))
        .into());
    }
    Ok(())
}

/// Generate a random device identifier: a UUID in URL-safe unpadded
/// base64, 22 characters.
pub fn generate_device_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(uuid.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::transport::MockTransport;

    const SENSOR_JSON: &str = r#"{
        "interface_name": "org.example.Sensor",
        "version_major": 1,
        "version_minor": 0,
        "type": "datastream",
        "ownership": "device",
        "mappings": [{ "endpoint": "/value", "type": "double" }]
    }"#;

    fn test_config() -> DeviceConfig {
        DeviceConfig::new("acme", "dev-1", "https://pairing.example.com", "/tmp/strato")
    }

    fn static_provider() -> Arc<dyn CredentialsProvider> {
        Arc::new(StaticCredentials::new(
            url::Url::parse("mqtt://localhost:1883").unwrap(),
        ))
    }

    #[test]
    fn device_ids_are_22_url_safe_chars() {
        let id = generate_device_id();
        assert_eq!(id.len(), 22);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(generate_device_id(), id);
    }

    #[tokio::test]
    async fn build_rejects_duplicate_interfaces() {
        let (transport, _handle) = MockTransport::new();
        let result = DeviceBuilder::new(test_config())
            .credentials(static_provider())
            .transport(Box::new(transport))
            .store(PropertyStore::in_memory())
            .interface_json(SENSOR_JSON)
            .unwrap()
            .interface_json(SENSOR_JSON)
            .unwrap()
            .build()
            .await;
        assert!(matches!(result, Err(DeviceError::Configuration(_))));
    }

    #[tokio::test]
    async fn build_rejects_unconfigured_credentials() {
        let (transport, _handle) = MockTransport::new();
        let result = DeviceBuilder::new(test_config())
            .transport(Box::new(transport))
            .store(PropertyStore::in_memory())
            .interface_json(SENSOR_JSON)
            .unwrap()
            .build()
            .await;
        assert!(matches!(result, Err(DeviceError::Configuration(_))));
    }
}
