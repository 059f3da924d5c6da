/*!
Mock MQTT sink for tests without a broker

Records every message a monitor loop publishes (discovery configs and
states) and lets tests refuse connections or make publishes fail.
*/

use async_trait::async_trait;
use franklin_monitor::config::TargetDescriptor;
use franklin_monitor::discovery::BinarySensorConfig;
use franklin_monitor::error::PublishError;
use franklin_monitor::mqtt::{MessageSink, SinkConnector};
use rumqttc::QoS;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    /// Tokio clock, so paused-time tests can measure intervals.
    pub at: Instant,
}

impl MockMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Mock sink standing in for `rumqttc::AsyncClient`
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    failing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail with `PublishError::Closed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// True once the owning monitor loop released the sink.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Every `/config` message, decoded.
    pub fn registrations(&self) -> Vec<BinarySensorConfig> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic.ends_with("/config"))
            .filter_map(|msg| serde_json::from_slice(&msg.payload).ok())
            .collect()
    }

    /// Every `/state` message, in publish order.
    pub fn state_messages(&self) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic.ends_with("/state"))
            .cloned()
            .collect()
    }

    /// State payloads (`ON`/`OFF`), in publish order.
    pub fn states(&self) -> Vec<String> {
        self.state_messages().iter().map(MockMessage::payload_str).collect()
    }

    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageSink for MockMqttClient {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            tracing::info!("[MOCK] Rejected publish to {}", topic);
            return Err(PublishError::Closed);
        }

        let message = MockMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            at: Instant::now(),
        };
        tracing::info!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) {
        tracing::info!("[MOCK] Closed");
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one `MockMqttClient` per target unique id.
#[derive(Default)]
pub struct MockConnector {
    clients: Mutex<HashMap<String, MockMqttClient>>,
    refused: Mutex<HashSet<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for `unique_id`, created on first use so tests can hold it early.
    pub fn client_for(&self, unique_id: &str) -> MockMqttClient {
        self.clients
            .lock()
            .unwrap()
            .entry(unique_id.to_string())
            .or_default()
            .clone()
    }

    /// Fail `connect` for this target.
    pub fn refuse(&self, unique_id: &str) {
        self.refused.lock().unwrap().insert(unique_id.to_string());
    }

    pub fn connected_targets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl SinkConnector for MockConnector {
    fn connect(&self, target: &TargetDescriptor, _shutdown: CancellationToken) -> Result<Arc<dyn MessageSink>, PublishError> {
        if self.refused.lock().unwrap().contains(&target.unique_id) {
            return Err(PublishError::Closed);
        }
        Ok(Arc::new(self.client_for(&target.unique_id)))
    }
}
