//! ha-franklin - CUPS queue monitor for Home Assistant
//!
//! Polls one or more CUPS print queues and republishes "jobs queued" as an
//! MQTT binary sensor that Home Assistant discovers automatically:
//! - Fleet mode: one independent monitor loop per configured queue
//! - Unreachable printers and failed queries never flip the sensor
//! - One-shot status check for scripting

pub mod check;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod mqtt;
pub mod presence;
pub mod probe;
pub mod publisher;
pub mod query;
pub mod supervisor;

#[cfg(test)]
mod test_log;

pub use config::{TargetDescriptor, TargetSettings};
pub use error::{ConfigError, MonitorError, PublishError, QueryError};
pub use monitor::{MonitorContext, MonitorLoop, MonitorSummary};
pub use presence::PresenceState;
pub use probe::ProbeResult;
pub use supervisor::{Fleet, FleetReport};
