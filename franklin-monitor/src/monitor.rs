//! Per-target monitor loop
//!
//! One loop owns one queue: probe, translate, publish, sleep, repeat.
//! Without a check interval the loop runs a single cycle and stops.
//! The interval sleep (and any in-flight cycle) is abandoned as soon as the
//! shutdown token is cancelled; nothing is published after that point.

use crate::config::{TargetDescriptor, TargetSettings};
use crate::discovery::{DeviceDescriptor, DiscoveryConfig};
use crate::error::MonitorError;
use crate::mqtt::SinkConnector;
use crate::presence::{translate, FaultKind, PresenceState, Translation};
use crate::probe::{probe_within, ProbeResult};
use crate::publisher::{DevicePublisher, PublishedDevice};
use crate::query::QueueQuery;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Probing,
    Translating,
    Publishing,
    Sleeping,
    Stopped,
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(PresenceState),
    /// The sink refused the message; the next cycle supersedes it.
    PublishFailed(PresenceState),
    Skipped(FaultKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No check interval configured.
    OneShot,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSummary {
    pub unique_id: String,
    pub cycles: u64,
    pub published: u64,
    pub skipped: u64,
    pub last_presence: Option<PresenceState>,
    pub stop_reason: StopReason,
}

/// Collaborators shared by every loop in a fleet.
#[derive(Clone)]
pub struct MonitorContext {
    pub query: Arc<dyn QueueQuery>,
    pub connector: Arc<dyn SinkConnector>,
    pub discovery: DiscoveryConfig,
}

pub struct MonitorLoop {
    target: TargetDescriptor,
    query: Arc<dyn QueueQuery>,
    publisher: DevicePublisher,
    device: PublishedDevice,
    state: MonitorState,
    last_presence: Option<PresenceState>,
    cycles: u64,
    published: u64,
    skipped: u64,
}

impl MonitorLoop {
    /// Validate the target, open its sink and register its device.
    ///
    /// Fails before any probing when the settings are incomplete.
    pub async fn start(
        settings: &TargetSettings,
        context: &MonitorContext,
        shutdown: CancellationToken,
    ) -> Result<Self, MonitorError> {
        let target = TargetDescriptor::from_settings(settings)?;
        info!(target_name = %target.unique_id, "Settings: {:?}", target);

        let sink = context
            .connector
            .connect(&target, shutdown)
            .map_err(MonitorError::Connect)?;
        let publisher = DevicePublisher::new(sink);
        let descriptor = DeviceDescriptor::for_target(&target, &context.discovery);
        debug!(target_name = %target.unique_id, "Device Info created: {:?}", descriptor.config.device);
        let device = match publisher.register(&descriptor).await {
            Ok(device) => device,
            Err(e) => {
                publisher.close().await;
                return Err(MonitorError::Connect(e));
            }
        };

        Ok(Self {
            target,
            query: Arc::clone(&context.query),
            publisher,
            device,
            state: MonitorState::Idle,
            last_presence: None,
            cycles: 0,
            published: 0,
            skipped: 0,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn device(&self) -> &PublishedDevice {
        &self.device
    }

    pub fn last_presence(&self) -> Option<PresenceState> {
        self.last_presence
    }

    fn transition(&mut self, next: MonitorState) {
        trace!(target_name = %self.target.unique_id, "{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn probe_target(&self) -> ProbeResult {
        let server = &self.target.server_address;
        let queue = &self.target.queue_name;
        info!(target_name = %self.target.unique_id, "Checking {} at {} for print ...", queue, server);

        probe_within(self.query.as_ref(), server, queue, self.target.query_timeout).await
    }

    /// Probe, translate and (maybe) publish once.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;

        self.transition(MonitorState::Probing);
        let result = self.probe_target().await;

        self.transition(MonitorState::Translating);
        let translation = translate(&result);
        self.last_presence = translation.presence(self.last_presence);

        let presence = match translation {
            Translation::Publish(presence) => presence,
            Translation::Skip(fault) => {
                warn!(target_name = %self.target.unique_id, "Skipping publish: {}", result);
                self.skipped += 1;
                return CycleOutcome::Skipped(fault);
            }
        };

        self.transition(MonitorState::Publishing);
        info!(target_name = %self.target.unique_id, "{}, setting to {}", result, presence);
        match self.publisher.publish(&self.device, presence).await {
            Ok(()) => {
                self.published += 1;
                CycleOutcome::Published(presence)
            }
            Err(e) => {
                error!(target_name = %self.target.unique_id, "Failed to publish state: {}", e);
                CycleOutcome::PublishFailed(presence)
            }
        }
    }

    /// Run cycles until one-shot completion or cancellation.
    pub async fn run(mut self, shutdown: CancellationToken) -> MonitorSummary {
        let stop_reason = loop {
            if shutdown.is_cancelled() {
                break StopReason::Cancelled;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break StopReason::Cancelled,
                outcome = self.run_cycle() => outcome,
            };
            debug!(target_name = %self.target.unique_id, "Cycle {} finished: {:?}", self.cycles, outcome);

            let Some(interval) = self.target.check_interval else {
                warn!(target_name = %self.target.unique_id, "check_interval not set, doing a one and done");
                break StopReason::OneShot;
            };

            self.transition(MonitorState::Sleeping);
            info!(target_name = %self.target.unique_id, "Sleeping {}...", interval.as_secs());
            tokio::select! {
                _ = shutdown.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        };

        self.transition(MonitorState::Stopped);
        self.publisher.close().await;
        info!(target_name = %self.target.unique_id, "Monitor stopped ({:?}) after {} cycles", stop_reason, self.cycles);

        MonitorSummary {
            unique_id: self.target.unique_id.clone(),
            cycles: self.cycles,
            published: self.published,
            skipped: self.skipped,
            last_presence: self.last_presence,
            stop_reason,
        }
    }
}

/// Start and run one target to completion.
pub async fn monitor_queue(
    settings: TargetSettings,
    context: MonitorContext,
    shutdown: CancellationToken,
) -> Result<MonitorSummary, MonitorError> {
    let monitor = MonitorLoop::start(&settings, &context, shutdown.clone()).await?;
    Ok(monitor.run(shutdown).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PublishError, QueryError};
    use crate::mqtt::MessageSink;
    use async_trait::async_trait;
    use rumqttc::QoS;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    struct CountingQuery {
        jobs: usize,
        unreachable: bool,
    }

    #[async_trait]
    impl QueueQuery for CountingQuery {
        async fn printer_status(&self, _: &str, _: &str) -> Result<Vec<String>, QueryError> {
            if self.unreachable {
                Ok(vec![crate::probe::PRINTER_UNREACHABLE.to_string()])
            } else {
                Ok(vec!["printer lj4 is idle.".to_string()])
            }
        }
        async fn queue_jobs(&self, _: &str, _: &str) -> Result<Vec<String>, QueryError> {
            Ok((0..self.jobs).map(|i| format!("lj4-{i} alice 1k")).collect())
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(Instant, String)>>,
        /// Publishes logged after close.
        late: Mutex<usize>,
        closed: AtomicBool,
        reject_config: bool,
    }

    #[async_trait]
    impl MessageSink for Recorder {
        async fn publish(&self, topic: &str, _: QoS, _: bool, payload: Vec<u8>) -> Result<(), PublishError> {
            if self.closed.load(Ordering::SeqCst) {
                *self.late.lock().unwrap() += 1;
            }
            if self.reject_config && topic.ends_with("/config") {
                return Err(PublishError::Closed);
            }
            if topic.ends_with("/state") {
                let payload = String::from_utf8(payload).unwrap();
                self.states.lock().unwrap().push((Instant::now(), payload));
            }
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Connector(Arc<Recorder>);

    impl SinkConnector for Connector {
        fn connect(&self, _: &TargetDescriptor, _: CancellationToken) -> Result<Arc<dyn MessageSink>, PublishError> {
            Ok(self.0.clone())
        }
    }

    fn context(query: CountingQuery, recorder: &Arc<Recorder>) -> MonitorContext {
        MonitorContext {
            query: Arc::new(query),
            connector: Arc::new(Connector(recorder.clone())),
            discovery: DiscoveryConfig::default(),
        }
    }

    fn settings(check_interval: Option<u64>) -> TargetSettings {
        TargetSettings {
            cupsd_server: Some("printsrv".into()),
            cupsd_queue_name: Some("lj4".into()),
            check_interval,
            mqtt_server: Some("broker".into()),
            mqtt_user: Some("ha".into()),
            mqtt_password: Some("pw".into()),
            ..Default::default()
        }
        .with_fallback_identity()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_runs_exactly_one_cycle() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 0, unreachable: false }, &recorder);

        let summary = monitor_queue(settings(None), ctx, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.stop_reason, StopReason::OneShot);
        assert_eq!(summary.last_presence, Some(PresenceState::Off));
        assert_eq!(recorder.states.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_are_separated_by_interval() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 2, unreachable: false }, &recorder);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(monitor_queue(settings(Some(5)), ctx, shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(23)).await;
        shutdown.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        let states = recorder.states.lock().unwrap();
        assert_eq!(states.len(), 5);
        assert!(states.iter().all(|(_, payload)| payload == "ON"));
        for pair in states.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_keeps_previous_state_and_continues() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 1, unreachable: true }, &recorder);
        let shutdown = CancellationToken::new();

        let mut monitor = MonitorLoop::start(&settings(Some(5)), &ctx, shutdown.clone()).await.unwrap();
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert_eq!(monitor.run_cycle().await, CycleOutcome::Skipped(FaultKind::Unreachable));
        assert_eq!(monitor.run_cycle().await, CycleOutcome::Skipped(FaultKind::Unreachable));
        assert_eq!(monitor.last_presence(), None);
        assert_eq!(monitor.state(), MonitorState::Translating);
        assert!(recorder.states.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_settings_fail_before_probing() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 1, unreachable: false }, &recorder);
        let broken = TargetSettings {
            mqtt_server: None,
            ..settings(Some(5))
        };

        let err = monitor_queue(broken, ctx, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MonitorError::InvalidSettings(_)));
        assert!(recorder.states.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_publishes_nothing() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 1, unreachable: false }, &recorder);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = monitor_queue(settings(Some(5)), ctx, shutdown).await.unwrap();
        assert_eq!(summary.cycles, 0);
        assert!(recorder.states.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_is_closed_when_loop_stops() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 1, unreachable: false }, &recorder);

        monitor_queue(settings(None), ctx, CancellationToken::new()).await.unwrap();
        assert!(recorder.closed.load(Ordering::SeqCst));
        assert_eq!(*recorder.late.lock().unwrap(), 0);
        assert_eq!(recorder.states.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_is_closed_when_registration_fails() {
        let recorder = Arc::new(Recorder {
            reject_config: true,
            ..Default::default()
        });
        let ctx = context(CountingQuery { jobs: 1, unreachable: false }, &recorder);

        let err = monitor_queue(settings(Some(5)), ctx, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Connect(PublishError::Closed)));
        assert!(recorder.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fields_are_logged_once() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(CountingQuery { jobs: 1, unreachable: false }, &recorder);
        let broken = TargetSettings {
            mqtt_server: None,
            ..settings(None)
        };

        let (logs, _guard) = crate::test_log::LogBuffer::capture();
        monitor_queue(broken, ctx, CancellationToken::new()).await.unwrap_err();

        assert_eq!(logs.count("'mqtt_server' missing"), 1, "{}", logs.contents());
        assert_eq!(logs.count("'check_interval' missing"), 0, "{}", logs.contents());
    }
}
