//! In-process transport double for tests.
//!
//! Records every publish, subscribe and unsubscribe, and lets the test
//! inject broker events through a [`MockHandle`]. Unless told otherwise
//! it acknowledges each connection with a clean session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use strato_interfaces::Interface;

use crate::error::{DeviceError, DeviceResult};
use crate::transport::{Transport, TransportEvent, TransportMessage};

/// A recorded publish.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// A recorded subscription.
#[derive(Debug, Clone)]
pub struct SubscribeRecord {
    pub topic: String,
    pub qos: u8,
}

#[derive(Default)]
struct MockState {
    publishes: Vec<PublishRecord>,
    subscriptions: Vec<SubscribeRecord>,
    unsubscribes: Vec<String>,
    registrations: Vec<Vec<String>>,
    connect_attempts: u32,
    failing_connects: u32,
    auto_connack: bool,
    session_present: bool,
    event_tx: Option<mpsc::Sender<TransportEvent>>,
}

/// Transport double wired to a [`MockHandle`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle observing and driving a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            auto_connack: true,
            ..MockState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Number of `connect` calls seen so far.
    pub async fn connect_attempts(&self) -> u32 {
        self.state.lock().await.connect_attempts
    }

    /// Make the next `n` connection attempts fail.
    pub async fn fail_next_connects(&self, n: u32) {
        self.state.lock().await.failing_connects = n;
    }

    /// Control the automatic connection acknowledgement.
    pub async fn set_auto_connack(&self, enabled: bool, session_present: bool) {
        let mut state = self.state.lock().await;
        state.auto_connack = enabled;
        state.session_present = session_present;
    }

    /// Inject a broker event into the current connection. Returns false
    /// when no connection is open.
    pub async fn push(&self, event: TransportEvent) -> bool {
        let tx = self.state.lock().await.event_tx.clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Inject an application message.
    pub async fn push_message(&self, topic: &str, payload: Vec<u8>) -> bool {
        self.push(TransportEvent::Message(TransportMessage {
            topic: topic.to_string(),
            payload,
        }))
        .await
    }

    /// Drop the link from the broker side.
    pub async fn drop_link(&self, reason: &str) -> bool {
        self.push(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn publishes(&self) -> Vec<PublishRecord> {
        self.state.lock().await.publishes.clone()
    }

    /// Recorded publishes on one topic.
    pub async fn publishes_to(&self, topic: &str) -> Vec<PublishRecord> {
        self.state
            .lock()
            .await
            .publishes
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<SubscribeRecord> {
        self.state.lock().await.subscriptions.clone()
    }

    pub async fn unsubscribes(&self) -> Vec<String> {
        self.state.lock().await.unsubscribes.clone()
    }

    /// Interface names handed to `register_interfaces`, one entry per call.
    pub async fn registrations(&self) -> Vec<Vec<String>> {
        self.state.lock().await.registrations.clone()
    }

    /// Forget recorded traffic. Connection counters are kept.
    pub async fn clear_recorded(&self) {
        let mut state = self.state.lock().await;
        state.publishes.clear();
        state.subscriptions.clear();
        state.unsubscribes.clear();
        state.registrations.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> DeviceResult<mpsc::Receiver<TransportEvent>> {
        let mut state = self.state.lock().await;
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(DeviceError::Transport("forced connect failure".to_string()));
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        if state.auto_connack {
            let event = TransportEvent::Connected {
                session_present: state.session_present,
            };
            // Capacity is fresh, the send cannot block.
            if event_tx.send(event).await.is_err() {
                return Err(DeviceError::Transport("mock channel closed".to_string()));
            }
        }
        state.event_tx = Some(event_tx);
        Ok(event_rx)
    }

    async fn disconnect(&mut self) -> DeviceResult<()> {
        self.state.lock().await.event_tx = None;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> DeviceResult<()> {
        self.state.lock().await.publishes.push(PublishRecord {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: u8) -> DeviceResult<()> {
        self.state.lock().await.subscriptions.push(SubscribeRecord {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> DeviceResult<()> {
        self.state.lock().await.unsubscribes.push(topic.to_string());
        Ok(())
    }

    async fn register_interfaces(&mut self, interfaces: &[Arc<Interface>]) -> DeviceResult<()> {
        let mut names: Vec<String> = interfaces
            .iter()
            .map(|iface| iface.name().to_string())
            .collect();
        names.sort();
        self.state.lock().await.registrations.push(names);
        Ok(())
    }
}
