//! Connection session state machine.
//!
//! One spawned task owns the transport and drives the whole connection
//! lifecycle. Commands arrive over a channel and are answered on
//! per-call reply channels; broker traffic and state changes are
//! delivered to the [`DeviceEvents`] handler bound at build time, always
//! from this one task.
//!
//! ## States
//!
//! - `Disconnected`: no link. Sends fail fast, interface changes mutate
//!   the registry only.
//! - `Connecting`: a user-requested connection attempt is in flight.
//! - `Connected`: the bootstrap sequence finished and traffic flows.
//! - `Reconnecting`: the link dropped. Attempts repeat with backoff until
//!   one succeeds or the client disconnects; credentials are re-checked
//!   on every attempt. Nothing queued while offline is replayed later.
//!
//! ## Bootstrap
//!
//! Every acknowledged connection subscribes to the property control topic
//! and all server-owned interfaces, then announces the introspection.
//! When the broker holds no session state the device additionally asks
//! for a cache refresh and republishes its own properties.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use strato_interfaces::{
    Interface, IntrospectionChange, IntrospectionTracker, Registry, Reliability, Value,
};
use strato_store::PropertyStore;

use crate::error::{DeviceError, DeviceResult};
use crate::payload;
use crate::retry::RetryPolicy;
use crate::topic::{self, IncomingTopic, TopicSpace, EMPTY_CACHE_PAYLOAD};
use crate::transport::{Transport, TransportEvent, TransportMessage};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Data delivered by the broker for one interface path.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedData {
    /// An individually aggregated value.
    Individual(Value),
    /// An object aggregate, one entry per leaf under the common path.
    Object(Vec<(String, Value)>),
    /// A property unset.
    Unset,
}

/// Application callbacks, bound once at build time and invoked from the
/// session task. Long-running handlers delay the session; spawn work off
/// if it is not quick.
#[async_trait]
pub trait DeviceEvents: Send + Sync {
    /// The connection is established and bootstrapped.
    async fn on_connected(&self, session_present: bool) {
        let _ = session_present;
    }

    /// The link dropped or the client disconnected.
    async fn on_disconnected(&self, reason: &str) {
        let _ = reason;
    }

    /// A server message passed validation.
    async fn on_data_received(
        &self,
        interface: &str,
        path: &str,
        data: ReceivedData,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let _ = (interface, path, data, timestamp);
    }
}

/// Handler used when the application binds no callbacks.
pub(crate) struct NullEvents;

#[async_trait]
impl DeviceEvents for NullEvents {}

/// A validated outgoing message, prepared by the client facade.
pub(crate) enum Outbound {
    Datastream {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
    },
    PropertySet {
        interface: String,
        path: String,
        value: Value,
        version_major: i32,
        topic: String,
        payload: Vec<u8>,
    },
    PropertyUnset {
        interface: String,
        path: String,
        topic: String,
    },
}

/// Commands for the session task.
pub(crate) enum SessionCommand {
    Connect {
        reply: mpsc::Sender<DeviceResult<()>>,
    },
    Disconnect {
        reply: mpsc::Sender<DeviceResult<()>>,
    },
    Send {
        outbound: Outbound,
        reply: mpsc::Sender<DeviceResult<()>>,
    },
    AddInterface {
        interface: Interface,
        reply: mpsc::Sender<DeviceResult<()>>,
    },
    RemoveInterface {
        name: String,
        reply: mpsc::Sender<DeviceResult<()>>,
    },
}

/// Client-side handle to a running session task.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    status: Arc<RwLock<ConnectionStatus>>,
}

impl SessionHandle {
    pub(crate) async fn connect(&self) -> DeviceResult<()> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(SessionCommand::Connect { reply: reply_tx })
            .await
            .map_err(|_| session_gone())?;
        reply_rx.recv().await.ok_or_else(session_gone)?
    }

    pub(crate) async fn disconnect(&self) -> DeviceResult<()> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(SessionCommand::Disconnect { reply: reply_tx })
            .await
            .map_err(|_| session_gone())?;
        reply_rx.recv().await.ok_or_else(session_gone)?
    }

    pub(crate) async fn send(&self, outbound: Outbound) -> DeviceResult<()> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(SessionCommand::Send {
                outbound,
                reply: reply_tx,
            })
            .await
            .map_err(|_| session_gone())?;
        reply_rx.recv().await.ok_or_else(session_gone)?
    }

    pub(crate) async fn add_interface(&self, interface: Interface) -> DeviceResult<()> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(SessionCommand::AddInterface {
                interface,
                reply: reply_tx,
            })
            .await
            .map_err(|_| session_gone())?;
        reply_rx.recv().await.ok_or_else(session_gone)?
    }

    pub(crate) async fn remove_interface(&self, name: &str) -> DeviceResult<()> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(SessionCommand::RemoveInterface {
                name: name.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| session_gone())?;
        reply_rx.recv().await.ok_or_else(session_gone)?
    }

    pub(crate) async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }
}

fn session_gone() -> DeviceError {
    DeviceError::Transport("session task is not running".to_string())
}

enum CommandFlow {
    Continue,
    Disconnect,
}

enum OfflineFlow {
    Continue,
    ConnectRequested(mpsc::Sender<DeviceResult<()>>),
    DisconnectRequested(mpsc::Sender<DeviceResult<()>>),
}

enum ReconnectOutcome {
    Online(mpsc::Receiver<TransportEvent>),
    Stopped,
    Shutdown,
}

enum SessionEnd {
    Idle,
    Shutdown,
}

pub(crate) struct Session {
    transport: Box<dyn Transport>,
    registry: Arc<RwLock<Registry>>,
    store: PropertyStore,
    topics: TopicSpace,
    tracker: IntrospectionTracker,
    retry: RetryPolicy,
    timeout: Duration,
    commands: mpsc::Receiver<SessionCommand>,
    handler: Arc<dyn DeviceEvents>,
    status: Arc<RwLock<ConnectionStatus>>,
}

impl Session {
    /// Spawn the session task and return its handle.
    pub(crate) fn spawn(
        transport: Box<dyn Transport>,
        registry: Arc<RwLock<Registry>>,
        store: PropertyStore,
        topics: TopicSpace,
        retry: RetryPolicy,
        timeout: Duration,
        handler: Arc<dyn DeviceEvents>,
    ) -> SessionHandle {
        let (command_tx, commands) = mpsc::channel(100);
        let status = Arc::new(RwLock::new(ConnectionStatus::Disconnected));

        let session = Session {
            transport,
            registry,
            store,
            topics,
            tracker: IntrospectionTracker::new(),
            retry,
            timeout,
            commands,
            handler,
            status: Arc::clone(&status),
        };
        tokio::spawn(session.run());

        SessionHandle { command_tx, status }
    }

    async fn run(mut self) {
        loop {
            // Disconnected: nothing to poll but commands.
            let Some(cmd) = self.commands.recv().await else {
                break;
            };
            match self.handle_offline_command(cmd).await {
                OfflineFlow::Continue => {}
                OfflineFlow::DisconnectRequested(reply) => {
                    let _ = reply.send(Ok(())).await;
                }
                OfflineFlow::ConnectRequested(reply) => {
                    if self.registry.read().await.is_empty() {
                        let _ = reply
                            .send(Err(DeviceError::Configuration(
                                "connect needs at least one registered interface".to_string(),
                            )))
                            .await;
                        continue;
                    }
                    self.set_status(ConnectionStatus::Connecting).await;
                    match self.establish().await {
                        Ok(events) => {
                            let _ = reply.send(Ok(())).await;
                            if let SessionEnd::Shutdown = self.online(events).await {
                                break;
                            }
                        }
                        Err(e) => {
                            self.set_status(ConnectionStatus::Disconnected).await;
                            let _ = reply.send(Err(e)).await;
                        }
                    }
                }
            }
        }
        let _ = self.transport.disconnect().await;
    }

    /// Connected phase. Returns when the client disconnects or every
    /// handle is gone.
    async fn online(&mut self, mut events: mpsc::Receiver<TransportEvent>) -> SessionEnd {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = event.unwrap_or_else(|| TransportEvent::Disconnected {
                        reason: "transport event channel closed".to_string(),
                    });
                    match event {
                        TransportEvent::Message(message) => self.handle_message(message).await,
                        TransportEvent::Connected { .. } => {}
                        TransportEvent::Disconnected { reason } => {
                            warn!(%reason, "connection lost");
                            self.handler.on_disconnected(&reason).await;
                            match self.reconnect_loop().await {
                                ReconnectOutcome::Online(next) => events = next,
                                ReconnectOutcome::Stopped => return SessionEnd::Idle,
                                ReconnectOutcome::Shutdown => return SessionEnd::Shutdown,
                            }
                        }
                    }
                }
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        return SessionEnd::Shutdown;
                    };
                    if let CommandFlow::Disconnect = self.handle_online_command(cmd).await {
                        return SessionEnd::Idle;
                    }
                }
            }
        }
    }

    /// Backoff loop after a dropped link. Commands stay responsive while
    /// waiting; a disconnect cancels the backoff.
    async fn reconnect_loop(&mut self) -> ReconnectOutcome {
        self.set_status(ConnectionStatus::Reconnecting).await;
        let mut attempt: u32 = 1;
        loop {
            let delay = self.retry.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            let deadline = tokio::time::Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    cmd = self.commands.recv() => {
                        let Some(cmd) = cmd else {
                            return ReconnectOutcome::Shutdown;
                        };
                        match self.handle_offline_command(cmd).await {
                            OfflineFlow::Continue => {}
                            // A reconnect is already in progress.
                            OfflineFlow::ConnectRequested(reply) => {
                                let _ = reply.send(Ok(())).await;
                            }
                            OfflineFlow::DisconnectRequested(reply) => {
                                let _ = self.transport.disconnect().await;
                                self.set_status(ConnectionStatus::Disconnected).await;
                                let _ = reply.send(Ok(())).await;
                                return ReconnectOutcome::Stopped;
                            }
                        }
                    }
                }
            }

            match self.establish().await {
                Ok(events) => return ReconnectOutcome::Online(events),
                Err(e) => {
                    warn!(attempt, "reconnect attempt failed: {e}");
                    attempt += 1;
                }
            }
        }
    }

    /// Open the link, wait for the acknowledgement and bootstrap.
    async fn establish(&mut self) -> DeviceResult<mpsc::Receiver<TransportEvent>> {
        let mut events = self.transport.connect().await?;

        let ack = tokio::time::timeout(self.timeout, events.recv())
            .await
            .map_err(|_| {
                DeviceError::Timeout("broker did not acknowledge the connection".to_string())
            })?
            .ok_or(DeviceError::Disconnected)?;
        let session_present = match ack {
            TransportEvent::Connected { session_present } => session_present,
            TransportEvent::Disconnected { reason } => return Err(DeviceError::Transport(reason)),
            TransportEvent::Message(_) => {
                return Err(DeviceError::Transport(
                    "message before connection acknowledgement".to_string(),
                ))
            }
        };

        if let Err(e) = self.bootstrap(session_present).await {
            let _ = self.transport.disconnect().await;
            return Err(e);
        }

        self.set_status(ConnectionStatus::Connected).await;
        info!(session_present, "connected");
        self.handler.on_connected(session_present).await;
        Ok(events)
    }

    async fn bootstrap(&mut self, session_present: bool) -> DeviceResult<()> {
        let qos = Reliability::Unique.qos();

        let consumer = self.topics.consumer_properties();
        self.transport.subscribe(&consumer, qos).await?;
        let server_roots: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .server_owned()
                .map(|iface| self.topics.interface_root(iface.name()))
                .collect()
        };
        for root in server_roots {
            self.transport.subscribe(&root, qos).await?;
        }

        let (introspection, interfaces) = {
            let registry = self.registry.read().await;
            (
                registry.introspection_string(),
                registry.iter().cloned().collect::<Vec<_>>(),
            )
        };
        self.transport
            .publish(self.topics.base(), introspection.into_bytes(), qos, false)
            .await?;
        self.transport.register_interfaces(&interfaces).await?;

        if !session_present {
            self.transport
                .publish(
                    &self.topics.empty_cache(),
                    EMPTY_CACHE_PAYLOAD.to_vec(),
                    qos,
                    false,
                )
                .await?;
            self.flush_device_properties().await?;
        }

        let registry = self.registry.read().await;
        self.tracker.mark_announced(&registry);
        Ok(())
    }

    /// Republish every stored device-owned property and announce the set
    /// on the producer control topic.
    async fn flush_device_properties(&mut self) -> DeviceResult<()> {
        let qos = Reliability::Unique.qos();
        let mut announced: Vec<(String, String)> = Vec::new();
        for prop in self.store.load_all(None)? {
            let publishable = {
                let registry = self.registry.read().await;
                match registry.get(&prop.interface) {
                    Some(iface)
                        if iface.is_properties()
                            && !iface.is_server_owned()
                            && iface.version_major() == prop.version_major =>
                    {
                        iface.mapping(&prop.path).is_ok()
                    }
                    _ => false,
                }
            };
            if !publishable {
                debug!(
                    interface = %prop.interface,
                    path = %prop.path,
                    "skipping stored property without a current mapping"
                );
                continue;
            }

            let data_topic = self.topics.data(&prop.interface, &prop.path);
            let encoded = payload::encode_individual(&prop.value, None)?;
            self.transport.publish(&data_topic, encoded, qos, false).await?;
            announced.push((prop.interface, prop.path));
        }

        let list =
            topic::encode_property_paths(announced.iter().map(|(i, p)| (i.as_str(), p.as_str())));
        self.transport
            .publish(&self.topics.producer_properties(), list, qos, false)
            .await?;
        Ok(())
    }

    /// Publish the introspection if it differs from the announced one.
    async fn announce_introspection(&mut self) -> DeviceResult<()> {
        let (change, introspection, interfaces) = {
            let registry = self.registry.read().await;
            (
                self.tracker.diff(&registry),
                registry.introspection_string(),
                registry.iter().cloned().collect::<Vec<_>>(),
            )
        };
        let IntrospectionChange::Changed { added, removed } = change else {
            return Ok(());
        };
        info!(?added, ?removed, "announcing introspection change");

        self.transport
            .publish(
                self.topics.base(),
                introspection.into_bytes(),
                Reliability::Unique.qos(),
                false,
            )
            .await?;
        self.transport.register_interfaces(&interfaces).await?;
        let registry = self.registry.read().await;
        self.tracker.mark_announced(&registry);
        Ok(())
    }

    async fn handle_online_command(&mut self, cmd: SessionCommand) -> CommandFlow {
        match cmd {
            SessionCommand::Connect { reply } => {
                let _ = reply.send(Ok(())).await;
            }
            SessionCommand::Disconnect { reply } => {
                let _ = self.transport.disconnect().await;
                self.set_status(ConnectionStatus::Disconnected).await;
                self.handler.on_disconnected("disconnected by client").await;
                let _ = reply.send(Ok(())).await;
                return CommandFlow::Disconnect;
            }
            SessionCommand::Send { outbound, reply } => {
                let result = self.dispatch_outbound(outbound).await;
                let _ = reply.send(result).await;
            }
            SessionCommand::AddInterface { interface, reply } => {
                let result = self.add_interface_online(interface).await;
                let _ = reply.send(result).await;
            }
            SessionCommand::RemoveInterface { name, reply } => {
                let result = self.remove_interface_online(&name).await;
                let _ = reply.send(result).await;
            }
        }
        CommandFlow::Continue
    }

    /// Commands while no link is up. Registry and store mutations apply
    /// immediately; the next bootstrap announces them.
    async fn handle_offline_command(&mut self, cmd: SessionCommand) -> OfflineFlow {
        match cmd {
            SessionCommand::Connect { reply } => return OfflineFlow::ConnectRequested(reply),
            SessionCommand::Disconnect { reply } => {
                return OfflineFlow::DisconnectRequested(reply)
            }
            SessionCommand::Send { reply, .. } => {
                let _ = reply.send(Err(DeviceError::Disconnected)).await;
            }
            SessionCommand::AddInterface { interface, reply } => {
                let result = self
                    .registry
                    .write()
                    .await
                    .add(interface)
                    .map(|_| ())
                    .map_err(Into::into);
                let _ = reply.send(result).await;
            }
            SessionCommand::RemoveInterface { name, reply } => {
                let removed = self.registry.write().await.remove(&name);
                let result = match removed {
                    Ok(_) => self
                        .store
                        .delete_interface(&name)
                        .map(|_| ())
                        .map_err(Into::into),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result).await;
            }
        }
        OfflineFlow::Continue
    }

    async fn dispatch_outbound(&mut self, outbound: Outbound) -> DeviceResult<()> {
        match outbound {
            Outbound::Datastream {
                topic,
                payload,
                qos,
            } => self.transport.publish(&topic, payload, qos, false).await,
            Outbound::PropertySet {
                interface,
                path,
                value,
                version_major,
                topic,
                payload,
            } => {
                // Persist first so the local cache never claims less than
                // what reached the broker.
                self.store.store(&interface, &path, &value, version_major)?;
                self.transport
                    .publish(&topic, payload, Reliability::Unique.qos(), false)
                    .await
            }
            Outbound::PropertyUnset {
                interface,
                path,
                topic,
            } => {
                self.store.delete(&interface, &path)?;
                self.transport
                    .publish(&topic, payload::encode_unset(), Reliability::Unique.qos(), false)
                    .await
            }
        }
    }

    async fn add_interface_online(&mut self, interface: Interface) -> DeviceResult<()> {
        let added = self.registry.write().await.add(interface)?;
        if added.is_server_owned() {
            let root = self.topics.interface_root(added.name());
            self.transport
                .subscribe(&root, Reliability::Unique.qos())
                .await?;
        }
        self.announce_introspection().await
    }

    async fn remove_interface_online(&mut self, name: &str) -> DeviceResult<()> {
        let removed = self.registry.write().await.remove(name)?;
        if removed.is_server_owned() {
            let root = self.topics.interface_root(removed.name());
            if let Err(e) = self.transport.unsubscribe(&root).await {
                warn!(interface = name, "unsubscribe failed: {e}");
            }
        }
        self.announce_introspection().await?;

        let evicted = self.store.delete_interface(name)?;
        if evicted > 0 {
            debug!(interface = name, evicted, "dropped stored properties");
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: TransportMessage) {
        match self.topics.parse(&message.topic) {
            None => {
                debug!(topic = %message.topic, "ignoring message outside the device topic space")
            }
            Some(IncomingTopic::Control(name)) => {
                self.handle_control(name, &message.payload).await
            }
            Some(IncomingTopic::Data { interface, path }) => {
                if let Err(e) = self.handle_data(interface, path, &message.payload).await {
                    warn!(topic = %message.topic, "dropping unprocessable message: {e}");
                }
            }
        }
    }

    async fn handle_control(&self, name: &str, payload: &[u8]) {
        match name {
            "consumer/properties" => {
                if let Err(e) = self.purge_server_properties(payload).await {
                    warn!("failed to apply the consumer property set: {e}");
                }
            }
            other => debug!(control = other, "ignoring unknown control message"),
        }
    }

    /// The broker sent the full set of server properties it holds. Evict
    /// every stored server-owned property that is not in it.
    async fn purge_server_properties(&self, payload: &[u8]) -> DeviceResult<()> {
        let keep: HashSet<(String, String)> =
            topic::decode_property_paths(payload).into_iter().collect();

        let registry = self.registry.read().await;
        let mut evicted = 0usize;
        for prop in self.store.load_all(None)? {
            let server_owned = registry
                .get(&prop.interface)
                .map(|iface| iface.is_server_owned())
                .unwrap_or(false);
            if !server_owned {
                continue;
            }
            if keep.contains(&(prop.interface.clone(), prop.path.clone())) {
                continue;
            }
            if self.store.delete(&prop.interface, &prop.path)? {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "purged server properties absent from the consumer set");
        }
        Ok(())
    }

    async fn handle_data(&self, interface: &str, path: &str, payload: &[u8]) -> DeviceResult<()> {
        let iface = {
            let registry = self.registry.read().await;
            match registry.get(interface) {
                Some(iface) => Arc::clone(iface),
                None => {
                    debug!(interface, "message for an unregistered interface");
                    return Ok(());
                }
            }
        };

        if !iface.is_server_owned() {
            warn!(interface, "server message on a device-owned interface");
            return Ok(());
        }

        if payload.is_empty() {
            return self.handle_unset(&iface, path).await;
        }

        let envelope = payload::decode_envelope(payload)?;

        if iface.is_aggregate_object() {
            let entries = payload::cbor_map_entries(envelope.value)?;
            let mut pairs = Vec::with_capacity(entries.len());
            for (leaf, item) in entries {
                let full = format!("{path}/{leaf}");
                let mapping = iface.mapping(&full)?;
                pairs.push((leaf, payload::value_from_cbor(item, mapping.mapping_type())?));
            }
            self.handler
                .on_data_received(
                    iface.name(),
                    path,
                    ReceivedData::Object(pairs),
                    envelope.timestamp,
                )
                .await;
            return Ok(());
        }

        let mapping = iface.mapping(path)?;
        let value = payload::value_from_cbor(envelope.value, mapping.mapping_type())?;
        iface.validate_received(path, &value)?;

        if iface.is_properties() {
            self.store
                .store(iface.name(), path, &value, iface.version_major())?;
        }

        self.handler
            .on_data_received(
                iface.name(),
                path,
                ReceivedData::Individual(value),
                envelope.timestamp,
            )
            .await;
        Ok(())
    }

    /// A zero length payload unsets a property. Anything else shaped like
    /// an unset is logged and dropped.
    async fn handle_unset(&self, iface: &Interface, path: &str) -> DeviceResult<()> {
        if !iface.is_properties() {
            warn!(interface = iface.name(), path, "zero length payload on a datastream");
            return Ok(());
        }
        let mapping = iface.mapping(path)?;
        if !mapping.allow_unset() {
            debug!(
                interface = iface.name(),
                path, "unset received on a mapping without allow_unset"
            );
        }
        self.store.delete(iface.name(), path)?;
        self.handler
            .on_data_received(iface.name(), path, ReceivedData::Unset, None)
            .await;
        Ok(())
    }

    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status;
    }
}
