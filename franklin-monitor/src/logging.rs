//! Logging setup, done once before any monitor loop starts

use anyhow::anyhow;
use clap::ValueEnum;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Log level names as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    Info,
    #[value(alias = "WARN")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` has no critical level; it maps to error.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Timestamp, level, source file and line
    Full,
    Compact,
    Pretty,
    Json,
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over `level`.
pub fn init_logging(level: LogLevel, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match format {
        LogFormat::Full => builder.with_file(true).with_line_number(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    info!("Log level set to {}", level.directive());
    debug!("Using '{:?}' for log format", format);
    Ok(())
}
