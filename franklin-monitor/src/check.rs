//! One-shot "is the printer unreachable?" check
//!
//! Reports every configured target, one line each. The process exit code is
//! 0 when at least one printer is unreachable and 1 otherwise, so the command
//! can drive scripts that kick cupsd awake.

use crate::config::{TargetSettings, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::probe::{probe_within, ProbeResult};
use crate::query::QueueQuery;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const EXIT_UNREACHABLE: u8 = 0;
pub const EXIT_REACHABLE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
    pub unique_id: String,
    pub unreachable: bool,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: printer unreachable = {}", self.unique_id, self.unreachable)
    }
}

/// Probe each target once. Targets without a server or queue are skipped.
pub async fn check_targets(query: &dyn QueueQuery, targets: &[TargetSettings]) -> Vec<TargetStatus> {
    let mut statuses = Vec::with_capacity(targets.len());
    for settings in targets {
        let server = settings.cupsd_server.as_deref().filter(|v| !v.trim().is_empty());
        let queue = settings.cupsd_queue_name.as_deref().filter(|v| !v.trim().is_empty());
        let (Some(server), Some(queue)) = (server, queue) else {
            warn!(target_name = %settings.label(), "No cupsd_server/cupsd_queue_name, skipping check");
            continue;
        };

        let limit = Duration::from_secs(
            settings
                .query_timeout
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
        );
        let result = probe_within(query, server, queue, limit).await;
        debug!(target_name = %settings.label(), "Probe result: {}", result);
        // Only an explicit report counts; a failed query is not "unreachable".
        let unreachable = matches!(result, ProbeResult::Unreachable);
        if let ProbeResult::QueryFailed { cause } = &result {
            warn!(target_name = %settings.label(), "Status query failed: {}", cause);
        }
        statuses.push(TargetStatus {
            unique_id: settings.label(),
            unreachable,
        });
    }
    statuses
}

pub fn exit_code(statuses: &[TargetStatus]) -> u8 {
    if statuses.iter().any(|s| s.unreachable) {
        EXIT_UNREACHABLE
    } else {
        EXIT_REACHABLE
    }
}
