//! Device registration and state publishing

use crate::discovery::DeviceDescriptor;
use crate::error::PublishError;
use crate::mqtt::MessageSink;
use crate::presence::PresenceState;
use rumqttc::QoS;
use std::sync::Arc;
use tracing::{debug, info};

/// Handle for a registered device; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDevice {
    pub unique_id: String,
    pub name: String,
    pub state_topic: String,
}

#[derive(Clone)]
pub struct DevicePublisher {
    sink: Arc<dyn MessageSink>,
}

impl DevicePublisher {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Push the retained discovery config for `device`.
    ///
    /// Re-registering pushes the identical payload to the same topic, which
    /// the hub treats as a refresh.
    pub async fn register(&self, device: &DeviceDescriptor) -> Result<PublishedDevice, PublishError> {
        let payload = serde_json::to_vec(&device.config)?;
        self.sink
            .publish(&device.config_topic, QoS::AtLeastOnce, true, payload)
            .await?;
        info!(target_name = %device.config.unique_id, "Registered device on {}", device.config_topic);

        Ok(PublishedDevice {
            unique_id: device.config.unique_id.clone(),
            name: device.config.name.clone(),
            state_topic: device.state_topic.clone(),
        })
    }

    /// Emit one state message.
    pub async fn publish(&self, device: &PublishedDevice, presence: PresenceState) -> Result<(), PublishError> {
        self.sink
            .publish(
                &device.state_topic,
                QoS::AtMostOnce,
                false,
                presence.payload().as_bytes().to_vec(),
            )
            .await?;
        debug!(target_name = %device.unique_id, "Published {} to {}", presence.payload(), device.state_topic);
        Ok(())
    }

    /// Flush pending messages and release the sink.
    pub async fn close(&self) {
        self.sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TargetDescriptor, TargetSettings};
    use crate::discovery::DiscoveryConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, bool, Vec<u8>)>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn publish(&self, topic: &str, _qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), PublishError> {
            self.sent.lock().unwrap().push((topic.to_string(), retain, payload));
            Ok(())
        }
    }

    fn device() -> DeviceDescriptor {
        let target = TargetDescriptor::from_settings(&TargetSettings {
            cupsd_server: Some("printsrv".into()),
            cupsd_queue_name: Some("lj4".into()),
            mqtt_server: Some("broker".into()),
            mqtt_user: Some("ha".into()),
            mqtt_password: Some("pw".into()),
            ..Default::default()
        })
        .unwrap();
        DeviceDescriptor::for_target(&target, &DiscoveryConfig::default())
    }

    #[tokio::test]
    async fn test_register_twice_sends_identical_retained_config() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = DevicePublisher::new(sink.clone());

        let first = publisher.register(&device()).await.unwrap();
        let second = publisher.register(&device()).await.unwrap();
        assert_eq!(first, second);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert!(sent[0].1, "discovery config must be retained");
    }

    #[tokio::test]
    async fn test_publish_sends_one_message_per_call() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = DevicePublisher::new(sink.clone());
        let published = publisher.register(&device()).await.unwrap();

        publisher.publish(&published, PresenceState::On).await.unwrap();
        publisher.publish(&published, PresenceState::Off).await.unwrap();

        let sent = sink.sent.lock().unwrap();
        let states: Vec<&[u8]> = sent[1..].iter().map(|(_, _, p)| p.as_slice()).collect();
        assert_eq!(states, vec![b"ON".as_slice(), b"OFF".as_slice()]);
        assert!(sent[1..].iter().all(|(topic, retain, _)| topic == &published.state_topic && !retain));
    }
}
