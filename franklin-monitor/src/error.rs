//! Error taxonomy for the queue monitor
//!
//! - `ConfigError`: settings cannot be loaded or a target lacks required keys
//! - `QueryError`: the lpstat collaborator failed (recovered per cycle)
//! - `PublishError`: the MQTT sink rejected a message (logged, never retried)
//! - `MonitorError`: fatal for a single monitor loop only

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("settings for {target} are missing: {}", .fields.join(", "))]
    MissingFields {
        target: String,
        fields: Vec<&'static str>,
    },

    #[error("no print queue definitions found")]
    NoTargets,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    Status {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("status query for {queue} on {server} timed out after {secs}s")]
    Timeout { server: String, queue: String, secs: u64 },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to encode discovery payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("message sink closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] ConfigError),

    #[error("could not connect publisher: {0}")]
    Connect(#[source] PublishError),
}
