//! Fleet supervisor: one monitor loop per configured queue
//!
//! Loops are spawned once, all at startup, and never restarted. A loop that
//! fails (bad settings, broker refused, panic) is logged and left stopped
//! while its siblings keep running.

use crate::config::TargetSettings;
use crate::error::MonitorError;
use crate::monitor::{monitor_queue, MonitorContext, MonitorSummary};
use std::collections::HashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How one loop ended.
#[derive(Debug)]
pub enum LoopExit {
    Finished(MonitorSummary),
    Failed { target: String, error: MonitorError },
    Panicked { target: String },
}

#[derive(Debug, Default)]
pub struct FleetReport {
    /// In completion order.
    pub exits: Vec<LoopExit>,
}

impl FleetReport {
    pub fn failed(&self) -> usize {
        self.exits
            .iter()
            .filter(|exit| !matches!(exit, LoopExit::Finished(_)))
            .count()
    }

    pub fn summary_for(&self, unique_id: &str) -> Option<&MonitorSummary> {
        self.exits.iter().find_map(|exit| match exit {
            LoopExit::Finished(summary) if summary.unique_id == unique_id => Some(summary),
            _ => None,
        })
    }
}

pub struct Fleet {
    context: MonitorContext,
    shutdown: CancellationToken,
}

impl Fleet {
    pub fn new(context: MonitorContext, shutdown: CancellationToken) -> Self {
        Self { context, shutdown }
    }

    /// Token that stops every loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one loop per target until every loop has ended.
    pub async fn run(&self, targets: Vec<TargetSettings>) -> FleetReport {
        info!("Found {} print queue definitions...", targets.len());
        debug!("Spawning {} monitor loops", targets.len());

        let mut loops = JoinSet::new();
        // A panicked task only reports its id.
        let mut labels = HashMap::new();
        for settings in targets {
            let label = settings.label();
            let context = self.context.clone();
            let shutdown = self.shutdown.child_token();
            let task_label = label.clone();
            let handle = loops.spawn(async move {
                let result = monitor_queue(settings, context, shutdown).await;
                (task_label, result)
            });
            labels.insert(handle.id(), label);
        }

        let mut report = FleetReport::default();
        while let Some(joined) = loops.join_next().await {
            let exit = match joined {
                Ok((_, Ok(summary))) => {
                    info!(target_name = %summary.unique_id, "Monitor loop finished ({:?})", summary.stop_reason);
                    LoopExit::Finished(summary)
                }
                Ok((target, Err(error))) => {
                    error!(target_name = %target, "Monitor loop failed: {}", error);
                    LoopExit::Failed { target, error }
                }
                Err(join_error) => {
                    let target = labels
                        .remove(&join_error.id())
                        .unwrap_or_else(|| join_error.id().to_string());
                    error!(target_name = %target, "Monitor loop panicked: {}", join_error);
                    LoopExit::Panicked { target }
                }
            };
            report.exits.push(exit);
        }

        info!("All monitor loops ended ({} failed)", report.failed());
        report
    }
}
