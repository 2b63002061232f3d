//! Broker transports.
//!
//! A [`Transport`] owns one link to the broker. `connect` hands back a
//! fresh event channel per attempt; when the link dies its pump sends a
//! final [`TransportEvent::Disconnected`] and the channel closes, so
//! events from a previous connection can never leak into the next one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use strato_interfaces::Interface;

use crate::error::DeviceResult;

pub mod mock;
pub mod mqtt;

pub use mock::{MockHandle, MockTransport};
pub use mqtt::MqttTransport;

/// An application message from the broker.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Connection-level events surfaced to the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The broker acknowledged the connection. `session_present` is false
    /// when the broker holds no state for this client.
    Connected { session_present: bool },
    /// An application message arrived.
    Message(TransportMessage),
    /// The link dropped. The session decides whether to reconnect.
    Disconnected { reason: String },
}

/// One link to the broker. Methods take `&mut self`: the session owns the
/// transport and drives it from a single task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link. Events for this connection arrive on the returned
    /// channel, starting with [`TransportEvent::Connected`].
    async fn connect(&mut self) -> DeviceResult<mpsc::Receiver<TransportEvent>>;

    /// Close the link. Idempotent.
    async fn disconnect(&mut self) -> DeviceResult<()>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> DeviceResult<()>;

    async fn subscribe(&mut self, topic: &str, qos: u8) -> DeviceResult<()>;

    async fn unsubscribe(&mut self, topic: &str) -> DeviceResult<()>;

    /// Hand the current interface set to transports that register full
    /// definitions with the remote node. Brokers which only consume the
    /// introspection announcement keep the default no-op.
    async fn register_interfaces(&mut self, interfaces: &[Arc<Interface>]) -> DeviceResult<()> {
        let _ = interfaces;
        Ok(())
    }
}
