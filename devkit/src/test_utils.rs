/*!
Test harness for monitor scenarios

Wires a scripted lpstat and a mock MQTT connector into a `Fleet`, runs it
for a span of (usually paused) tokio time, then cancels and collects the
report.
*/

use crate::mqtt_stub::{MockConnector, MockMqttClient};
use crate::query_stub::{ScriptStep, ScriptedQuery};
use franklin_monitor::config::TargetSettings;
use franklin_monitor::discovery::DiscoveryConfig;
use franklin_monitor::monitor::MonitorContext;
use franklin_monitor::supervisor::{Fleet, FleetReport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct TestHarness {
    pub query: Arc<ScriptedQuery>,
    pub connector: Arc<MockConnector>,
    pub shutdown: CancellationToken,
}

impl TestHarness {
    pub fn new() -> Self {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();

        Self {
            query: Arc::new(ScriptedQuery::new()),
            connector: Arc::new(MockConnector::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Complete settings for `server`/`queue`, identity derived as `{server}-{queue}`.
    pub fn target(server: &str, queue: &str, check_interval: Option<u64>) -> TargetSettings {
        TargetSettings {
            cupsd_server: Some(server.to_string()),
            cupsd_queue_name: Some(queue.to_string()),
            check_interval,
            mqtt_server: Some("broker.test".to_string()),
            mqtt_user: Some("ha".to_string()),
            mqtt_password: Some("secret".to_string()),
            ..Default::default()
        }
        .with_fallback_identity()
    }

    pub fn script(&self, server: &str, queue: &str, steps: impl IntoIterator<Item = ScriptStep>) -> &Self {
        self.query.script(server, queue, steps);
        self
    }

    pub fn context(&self) -> MonitorContext {
        MonitorContext {
            query: self.query.clone(),
            connector: self.connector.clone(),
            discovery: DiscoveryConfig::default(),
        }
    }

    pub fn fleet(&self) -> Fleet {
        Fleet::new(self.context(), self.shutdown.clone())
    }

    /// MQTT client of one target, by unique id.
    pub fn client(&self, unique_id: &str) -> MockMqttClient {
        self.connector.client_for(unique_id)
    }

    /// Run the fleet for `span` of tokio time, then cancel and wait for it.
    pub async fn run_for(&self, targets: Vec<TargetSettings>, span: Duration) -> FleetReport {
        let fleet = self.fleet();
        let handle = tokio::spawn(async move { fleet.run(targets).await });
        tokio::time::sleep(span).await;
        self.shutdown.cancel();
        match handle.await {
            Ok(report) => report,
            Err(e) => panic!("fleet task failed: {e}"),
        }
    }

    /// Run the fleet until every loop ends on its own.
    pub async fn run_to_completion(&self, targets: Vec<TargetSettings>) -> FleetReport {
        self.fleet().run(targets).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_harness_one_shot_fleet_completes() {
        let harness = TestHarness::new();
        harness.script("printsrv", "lj4", [ScriptStep::Jobs(1)]);

        let report = harness
            .run_to_completion(vec![TestHarness::target("printsrv", "lj4", None)])
            .await;

        assert_eq!(report.failed(), 0);
        assert_eq!(harness.client("printsrv-lj4").states(), vec!["ON"]);
    }
}
