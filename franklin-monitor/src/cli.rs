//! Command line interface for `ha-franklin`

use crate::config::{TargetSettings, DEFAULT_SETTINGS_FILE};
use crate::logging::{LogFormat, LogLevel};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "ha-franklin",
    version,
    about = "Monitor CUPS printer queues and create MQTT topics compatible with Home Assistant"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Monitor every configured queue until interrupted
    Monitor(CommonArgs),
    /// Check each configured queue once; exits 0 if any printer is unreachable
    Check(CommonArgs),
}

impl Command {
    pub fn args(&self) -> &CommonArgs {
        match self {
            Command::Monitor(args) | Command::Check(args) => args,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Set log level
    #[arg(short = 'l', long, visible_alias = "logging", value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Full)]
    pub log_format: LogFormat,

    /// Path to a settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    pub settings_file: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,
}

impl CommonArgs {
    pub fn effective_log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }
}

/// Flags mirroring the settings file keys.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// DNS name/IP of CUPS server
    #[arg(long, visible_aliases = ["cups-server", "print-server"])]
    pub cupsd_server: Option<String>,

    /// Name of CUPS printer queue to monitor
    #[arg(long, visible_aliases = ["cups-queue-name", "queue-name"])]
    pub cupsd_queue_name: Option<String>,

    /// Number of seconds between checks
    #[arg(long)]
    pub check_interval: Option<u64>,

    /// DNS name/IP of MQTT server
    #[arg(long)]
    pub mqtt_server: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// MQTT username
    #[arg(long, visible_alias = "mqtt-username")]
    pub mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long)]
    pub mqtt_password: Option<String>,

    /// Unique id of the Home Assistant entity
    #[arg(long)]
    pub unique_id: Option<String>,

    /// Display name of the Home Assistant entity
    #[arg(long)]
    pub name: Option<String>,

    /// Seconds before an lpstat call is abandoned
    #[arg(long)]
    pub query_timeout: Option<u64>,
}

impl From<&TargetArgs> for TargetSettings {
    fn from(args: &TargetArgs) -> Self {
        TargetSettings {
            cupsd_server: args.cupsd_server.clone(),
            cupsd_queue_name: args.cupsd_queue_name.clone(),
            check_interval: args.check_interval,
            mqtt_server: args.mqtt_server.clone(),
            mqtt_port: args.mqtt_port,
            mqtt_user: args.mqtt_user.clone(),
            mqtt_password: args.mqtt_password.clone(),
            unique_id: args.unique_id.clone(),
            name: args.name.clone(),
            query_timeout: args.query_timeout,
        }
    }
}
