//! Settings loading and target resolution
//!
//! Handles:
//! - YAML settings file (single mapping, or a sequence for fleet mode)
//! - Field-by-field command line overrides
//! - Validation of required keys
//! - Fallback identity derivation for published devices

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SETTINGS_FILE: &str = "/config/ha-franklin.yaml";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Keys a target needs before it can be monitored continuously.
pub const REQUIRED_FIELDS: [&str; 6] = [
    "cupsd_server",
    "cupsd_queue_name",
    "check_interval",
    "mqtt_server",
    "mqtt_user",
    "mqtt_password",
];

/// One settings record, as found in the file or built from CLI flags.
///
/// Every key is optional here; empty strings count as absent.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub cupsd_server: Option<String>,
    pub cupsd_queue_name: Option<String>,
    pub check_interval: Option<u64>,
    pub mqtt_server: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub unique_id: Option<String>,
    pub name: Option<String>,
    pub query_timeout: Option<u64>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn pick(overrides: &Option<String>, base: Option<String>) -> Option<String> {
    match present(overrides) {
        Some(v) => Some(v.to_string()),
        None => base,
    }
}

impl TargetSettings {
    /// Required keys absent from this record, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let checks = [
            present(&self.cupsd_server).is_some(),
            present(&self.cupsd_queue_name).is_some(),
            self.check_interval.is_some(),
            present(&self.mqtt_server).is_some(),
            present(&self.mqtt_user).is_some(),
            present(&self.mqtt_password).is_some(),
        ];
        REQUIRED_FIELDS
            .iter()
            .zip(checks)
            .filter(|(_, ok)| !ok)
            .map(|(field, _)| *field)
            .collect()
    }

    /// True when all six required keys are present. Logs each missing key.
    pub fn is_valid(&self) -> bool {
        let missing = self.missing_fields();
        for field in &missing {
            error!(target_name = %self.label(), "'{}' missing from settings.", field);
        }
        missing.is_empty()
    }

    /// `"{server}-{queue}"`, when both are known.
    pub fn derived_identity(&self) -> Option<String> {
        let server = present(&self.cupsd_server)?;
        let queue = present(&self.cupsd_queue_name)?;
        Some(format!("{server}-{queue}"))
    }

    /// Fill `unique_id` and `name` from the server/queue pair when absent.
    pub fn with_fallback_identity(mut self) -> Self {
        let Some(derived) = self.derived_identity() else {
            return self;
        };
        if present(&self.unique_id).is_none() {
            warn!("No unique_id in settings, using generated {}.", derived);
            self.unique_id = Some(derived.clone());
        } else {
            info!("Using {} from settings as unique_id.", self.unique_id.as_deref().unwrap_or_default());
        }
        if present(&self.name).is_none() {
            warn!("No name in settings, using generated {}.", derived);
            self.name = Some(derived);
        }
        self
    }

    /// Human label for log lines, usable before validation.
    pub fn label(&self) -> String {
        present(&self.unique_id)
            .map(str::to_string)
            .or_else(|| self.derived_identity())
            .unwrap_or_else(|| "<unnamed target>".to_string())
    }
}

impl fmt::Debug for TargetSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSettings")
            .field("cupsd_server", &self.cupsd_server)
            .field("cupsd_queue_name", &self.cupsd_queue_name)
            .field("check_interval", &self.check_interval)
            .field("mqtt_server", &self.mqtt_server)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_user", &self.mqtt_user)
            .field("mqtt_password", &self.mqtt_password.as_ref().map(|_| "<redacted>"))
            .field("unique_id", &self.unique_id)
            .field("name", &self.name)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Apply command line values over file values, key by key.
///
/// A CLI value wins only when it is present and non-empty (zero for numbers).
pub fn merge(base: TargetSettings, overrides: &TargetSettings) -> TargetSettings {
    TargetSettings {
        cupsd_server: pick(&overrides.cupsd_server, base.cupsd_server),
        cupsd_queue_name: pick(&overrides.cupsd_queue_name, base.cupsd_queue_name),
        check_interval: overrides.check_interval.filter(|v| *v > 0).or(base.check_interval),
        mqtt_server: pick(&overrides.mqtt_server, base.mqtt_server),
        mqtt_port: overrides.mqtt_port.filter(|v| *v > 0).or(base.mqtt_port),
        mqtt_user: pick(&overrides.mqtt_user, base.mqtt_user),
        mqtt_password: pick(&overrides.mqtt_password, base.mqtt_password),
        unique_id: pick(&overrides.unique_id, base.unique_id),
        name: pick(&overrides.name, base.name),
        query_timeout: overrides.query_timeout.filter(|v| *v > 0).or(base.query_timeout),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SettingsDocument {
    Fleet(Vec<TargetSettings>),
    Single(TargetSettings),
}

/// Whether the settings file described one queue or a list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsMode {
    Single,
    Fleet,
}

/// Fully merged settings, one record per target, in file order.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub mode: SettingsMode,
    pub targets: Vec<TargetSettings>,
}

fn parse_document(path: &Path, text: &str) -> Result<SettingsDocument, ConfigError> {
    if text.trim().is_empty() {
        return Ok(SettingsDocument::Single(TargetSettings::default()));
    }
    serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge already-read file contents with command line overrides.
pub fn resolve_settings(
    path: &Path,
    text: Option<&str>,
    overrides: &TargetSettings,
) -> Result<LoadedSettings, ConfigError> {
    let document = match text {
        Some(text) => parse_document(path, text)?,
        None => SettingsDocument::Single(TargetSettings::default()),
    };
    debug!("Base settings: {:?}", document);

    let (mode, records) = match document {
        SettingsDocument::Single(record) => (SettingsMode::Single, vec![record]),
        SettingsDocument::Fleet(records) => (SettingsMode::Fleet, records),
    };
    if records.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    let targets: Vec<TargetSettings> = records
        .into_iter()
        .map(|record| merge(record, overrides).with_fallback_identity())
        .collect();
    debug!("Processed settings: {:?}", targets);

    Ok(LoadedSettings { mode, targets })
}

/// Load the settings file at `path`, then apply command line overrides.
///
/// A missing file is not fatal: the command line alone may describe a target.
pub async fn load_settings(path: &Path, overrides: &TargetSettings) -> Result<LoadedSettings, ConfigError> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("Could not read {}", path.display());
            None
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    resolve_settings(path, text.as_deref(), overrides)
}

/// MQTT broker connection parameters for one target.
#[derive(Clone, PartialEq, Eq)]
pub struct MessagingEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for MessagingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable description of one monitored queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub server_address: String,
    pub queue_name: String,
    /// `None` means probe once and stop.
    pub check_interval: Option<Duration>,
    pub messaging: MessagingEndpoint,
    pub unique_id: String,
    pub display_name: String,
    pub query_timeout: Duration,
}

impl TargetDescriptor {
    /// Build a descriptor from merged settings.
    ///
    /// Everything but `check_interval` is mandatory; without an interval the
    /// target runs a single cycle.
    pub fn from_settings(settings: &TargetSettings) -> Result<Self, ConfigError> {
        let missing: Vec<&'static str> = settings
            .missing_fields()
            .into_iter()
            .filter(|field| *field != "check_interval")
            .collect();
        if !missing.is_empty() {
            for field in &missing {
                error!(target_name = %settings.label(), "'{}' missing from settings.", field);
            }
            return Err(ConfigError::MissingFields {
                target: settings.label(),
                fields: missing,
            });
        }

        let check_interval = match settings.check_interval {
            Some(0) => {
                return Err(ConfigError::MissingFields {
                    target: settings.label(),
                    fields: vec!["check_interval"],
                })
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => {
                warn!(target_name = %settings.label(), "check_interval not set, doing a one and done");
                None
            }
        };

        let field = |value: &Option<String>| present(value).unwrap_or_default().to_string();
        // Loaded settings already carry an identity; derive only for bare records.
        let derived = settings.derived_identity().unwrap_or_default();
        let unique_id = present(&settings.unique_id).map_or_else(|| derived.clone(), str::to_string);
        let display_name = present(&settings.name).map_or(derived, str::to_string);

        Ok(Self {
            server_address: field(&settings.cupsd_server),
            queue_name: field(&settings.cupsd_queue_name),
            check_interval,
            messaging: MessagingEndpoint {
                host: field(&settings.mqtt_server),
                port: settings.mqtt_port.unwrap_or(DEFAULT_MQTT_PORT),
                username: field(&settings.mqtt_user),
                password: field(&settings.mqtt_password),
            },
            unique_id,
            display_name,
            query_timeout: Duration::from_secs(
                settings.query_timeout.filter(|v| *v > 0).unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
            ),
        })
    }
}
