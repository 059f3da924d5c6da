//! MQTT transport for published devices
//!
//! `MessageSink` mirrors `rumqttc::AsyncClient::publish` so tests can swap in
//! a recording stub. `MqttConnector` opens one client per monitored target and
//! drives its event loop until the sink is closed or shutdown is requested.

use crate::config::TargetDescriptor;
use crate::discovery::object_id;
use crate::error::PublishError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Upper bound for flushing queued messages when a sink is closed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), PublishError>;

    /// Deliver whatever is still queued, then release the connection.
    async fn close(&self) {}
}

/// Opens the sink a monitor loop publishes through.
pub trait SinkConnector: Send + Sync {
    fn connect(&self, target: &TargetDescriptor, shutdown: CancellationToken) -> Result<Arc<dyn MessageSink>, PublishError>;
}

/// Sink backed by a live broker connection.
pub struct MqttSink {
    client: AsyncClient,
    label: String,
    closing: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MessageSink for MqttSink {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), PublishError> {
        // Never wait on a full request queue: a later cycle supersedes this one.
        self.client.try_publish(topic, qos, retain, payload)?;
        Ok(())
    }

    /// Queue a DISCONNECT behind pending publishes and wait for the event
    /// loop to write it. Gives up after `CLOSE_TIMEOUT`.
    async fn close(&self) {
        let Some(mut handle) = self.event_loop.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        self.closing.cancel();

        let drain = async {
            if let Err(e) = self.client.disconnect().await {
                debug!(target_name = %self.label, "MQTT event loop already stopped: {}", e);
            }
            if let Err(e) = (&mut handle).await {
                error!(target_name = %self.label, "MQTT event loop failed: {}", e);
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            warn!(target_name = %self.label, "MQTT connection did not close within {}s, dropping it", CLOSE_TIMEOUT.as_secs());
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MqttConnector;

impl MqttConnector {
    fn options(target: &TargetDescriptor) -> MqttOptions {
        let client_id = format!("ha-franklin-{}", object_id(&target.unique_id));
        let endpoint = &target.messaging;

        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_credentials(&endpoint.username, &endpoint.password);
        options
    }
}

impl SinkConnector for MqttConnector {
    fn connect(&self, target: &TargetDescriptor, shutdown: CancellationToken) -> Result<Arc<dyn MessageSink>, PublishError> {
        let (client, eventloop) = AsyncClient::new(Self::options(target), REQUEST_CHANNEL_CAPACITY);
        let label = target.unique_id.clone();
        let broker = format!("{}:{}", target.messaging.host, target.messaging.port);
        let closing = CancellationToken::new();

        let handle = tokio::spawn(drive(eventloop, label.clone(), broker, shutdown, closing.clone()));

        Ok(Arc::new(MqttSink {
            client,
            label,
            closing,
            event_loop: Mutex::new(Some(handle)),
        }))
    }
}

/// Poll the connection until our DISCONNECT goes out, the sink is closed
/// while the broker is unavailable, or shutdown is requested.
async fn drive(
    mut eventloop: EventLoop,
    label: String,
    broker: String,
    shutdown: CancellationToken,
    closing: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(target_name = %label, "MQTT event loop stopped");
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!(target_name = %label, "Connected to MQTT broker {}", broker);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!(target_name = %label, "Disconnected from MQTT broker {}", broker);
                break;
            }
            Ok(_) => {}
            Err(e) if closing.is_cancelled() => {
                warn!(target_name = %label, "MQTT connection lost while closing: {}", e);
                break;
            }
            Err(e) => {
                error!(target_name = %label, "MQTT connection error: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = closing.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetSettings;
    use crate::discovery::DiscoveryConfig;
    use crate::error::QueryError;
    use crate::monitor::{monitor_queue, MonitorContext};
    use crate::query::QueueQuery;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const PUBLISH: u8 = 3;
    const DISCONNECT: u8 = 14;

    struct BusyQueue;

    #[async_trait]
    impl QueueQuery for BusyQueue {
        async fn printer_status(&self, _: &str, queue: &str) -> Result<Vec<String>, QueryError> {
            Ok(vec![format!("printer {queue} now printing {queue}-1.")])
        }
        async fn queue_jobs(&self, _: &str, queue: &str) -> Result<Vec<String>, QueryError> {
            Ok(vec![format!("{queue}-1 alice 1024"), format!("{queue}-2 bob 2048")])
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let (mut len, mut shift) = (0usize, 0);
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Minimal broker: acks CONNECT after `connack_delay`, acks QoS 1
    /// publishes, and records `(fixed header, topic)` until DISCONNECT or EOF.
    async fn fake_broker(listener: TcpListener, connack_delay: Duration) -> Vec<(u8, String)> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        while let Ok((header, body)) = read_packet(&mut stream).await {
            match header >> 4 {
                1 => {
                    tokio::time::sleep(connack_delay).await;
                    let _ = stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await;
                }
                PUBLISH => {
                    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let topic = String::from_utf8_lossy(&body[2..2 + len]).into_owned();
                    if (header >> 1) & 0x03 == 1 {
                        let _ = stream.write_all(&[0x40, 0x02, body[2 + len], body[3 + len]]).await;
                    }
                    seen.push((header, topic));
                }
                DISCONNECT => {
                    seen.push((header, String::new()));
                    break;
                }
                _ => {}
            }
        }
        seen
    }

    fn settings(port: u16) -> TargetSettings {
        TargetSettings {
            cupsd_server: Some("printsrv".into()),
            cupsd_queue_name: Some("lj4".into()),
            mqtt_server: Some("127.0.0.1".into()),
            mqtt_port: Some(port),
            mqtt_user: Some("ha".into()),
            mqtt_password: Some("pw".into()),
            ..Default::default()
        }
        .with_fallback_identity()
    }

    #[tokio::test]
    async fn test_one_shot_delivers_config_and_state_before_returning() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Slow handshake: the probe finishes long before the broker answers.
        let broker = tokio::spawn(fake_broker(listener, Duration::from_millis(200)));

        let context = MonitorContext {
            query: Arc::new(BusyQueue),
            connector: Arc::new(MqttConnector),
            discovery: DiscoveryConfig::default(),
        };
        let shutdown = CancellationToken::new();
        let summary = monitor_queue(settings(port), context, shutdown.clone()).await.unwrap();
        assert_eq!(summary.published, 1);

        // Anything not yet written is lost from here on.
        shutdown.cancel();
        let seen = tokio::time::timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();

        let topics: Vec<&str> = seen.iter().map(|(_, topic)| topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/binary_sensor/printsrv-lj4/config",
                "hmd/binary_sensor/printsrv-lj4/state",
                "",
            ]
        );
        assert_eq!(seen[0].0 & 0x01, 1, "config must be retained");
        assert_eq!(seen[1].0 & 0x01, 0, "state must not be retained");
        assert_eq!(seen[2].0 >> 4, DISCONNECT);
    }

    #[tokio::test]
    async fn test_close_without_broker_returns() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = TargetDescriptor::from_settings(&settings(port)).unwrap();
        let sink = MqttConnector.connect(&target, CancellationToken::new()).unwrap();
        sink.publish("hmd/binary_sensor/x/state", QoS::AtMostOnce, false, b"ON".to_vec())
            .await
            .unwrap();

        tokio::time::timeout(CLOSE_TIMEOUT + Duration::from_secs(1), sink.close())
            .await
            .expect("close must not hang on a refused connection");
        // Closing twice is a no-op.
        sink.close().await;
    }
}
