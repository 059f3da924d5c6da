//! Probe result to binary sensor state

use crate::probe::ProbeResult;
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PresenceState {
    On,
    Off,
}

impl PresenceState {
    /// MQTT payload for the state topic.
    pub fn payload(self) -> &'static str {
        match self {
            PresenceState::On => "ON",
            PresenceState::Off => "OFF",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PresenceState::On => "on",
            PresenceState::Off => "off",
        })
    }
}

/// Why a cycle produced no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Unreachable,
    QueryFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Publish(PresenceState),
    Skip(FaultKind),
}

impl Translation {
    /// State after this cycle; a skipped cycle keeps `previous`.
    pub fn presence(self, previous: Option<PresenceState>) -> Option<PresenceState> {
        match self {
            Translation::Publish(state) => Some(state),
            Translation::Skip(_) => previous,
        }
    }

    pub fn fault(self) -> Option<FaultKind> {
        match self {
            Translation::Publish(_) => None,
            Translation::Skip(fault) => Some(fault),
        }
    }
}

/// Map a probe result onto the sensor.
///
/// Faults never flip the state: an offline printer is not an empty queue.
pub fn translate(result: &ProbeResult) -> Translation {
    match result {
        ProbeResult::Reachable { job_count } if *job_count > 0 => Translation::Publish(PresenceState::On),
        ProbeResult::Reachable { .. } => Translation::Publish(PresenceState::Off),
        ProbeResult::Unreachable => {
            warn!("Printer reported unreachable, skipping publish this cycle");
            Translation::Skip(FaultKind::Unreachable)
        }
        ProbeResult::QueryFailed { cause } => {
            warn!(error = %cause, "Queue query failed, skipping publish this cycle");
            Translation::Skip(FaultKind::QueryFailed)
        }
    }
}
