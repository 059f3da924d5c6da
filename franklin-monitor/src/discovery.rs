//! Home Assistant MQTT discovery schema
//!
//! Builds the retained `binary_sensor` config message a hub uses to create
//! the entity, and the topics state updates go to:
//! - `{discovery_prefix}/binary_sensor/{object_id}/config`
//! - `{state_prefix}/binary_sensor/{object_id}/state`

use crate::config::TargetDescriptor;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_STATE_PREFIX: &str = "hmd";
pub const DEVICE_CLASS: &str = "motion";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub discovery_prefix: String,
    pub state_prefix: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            state_prefix: DEFAULT_STATE_PREFIX.to_string(),
        }
    }
}

/// Device block of the discovery payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub identifiers: Vec<String>,
}

/// Discovery payload for one queue sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySensorConfig {
    pub name: String,
    pub unique_id: String,
    pub device_class: String,
    pub state_topic: String,
    pub payload_on: String,
    pub payload_off: String,
    pub device: DeviceInfo,
}

/// Everything needed to register one target with the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub object_id: String,
    pub config_topic: String,
    pub state_topic: String,
    pub config: BinarySensorConfig,
}

/// Topic-safe form of a unique id: anything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn object_id(unique_id: &str) -> String {
    unique_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

impl DeviceDescriptor {
    pub fn for_target(target: &TargetDescriptor, discovery: &DiscoveryConfig) -> Self {
        let object_id = object_id(&target.unique_id);
        let config_topic = format!("{}/binary_sensor/{}/config", discovery.discovery_prefix, object_id);
        let state_topic = format!("{}/binary_sensor/{}/state", discovery.state_prefix, object_id);

        Self {
            config: BinarySensorConfig {
                name: target.display_name.clone(),
                unique_id: target.unique_id.clone(),
                device_class: DEVICE_CLASS.to_string(),
                state_topic: state_topic.clone(),
                payload_on: "ON".to_string(),
                payload_off: "OFF".to_string(),
                device: DeviceInfo {
                    name: target.display_name.clone(),
                    identifiers: vec![target.unique_id.clone()],
                },
            },
            object_id,
            config_topic,
            state_topic,
        }
    }
}
