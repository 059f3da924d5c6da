//! ha-franklin - CUPS queue monitor for Home Assistant
//!
//! - `ha-franklin monitor`: publish every configured queue as a binary sensor
//! - `ha-franklin check`: report whether each printer is unreachable, once

use anyhow::{Context, Result};
use clap::Parser;
use franklin_monitor::check::{check_targets, exit_code, EXIT_CONFIG_ERROR};
use franklin_monitor::cli::{Cli, Command, CommonArgs};
use franklin_monitor::config::{load_settings, LoadedSettings, SettingsMode, TargetSettings};
use franklin_monitor::discovery::DiscoveryConfig;
use franklin_monitor::logging::init_logging;
use franklin_monitor::monitor::MonitorContext;
use franklin_monitor::mqtt::MqttConnector;
use franklin_monitor::query::LpstatQuery;
use franklin_monitor::supervisor::Fleet;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let args = cli.command.args();

    if let Err(e) = init_logging(args.effective_log_level(), args.log_format) {
        eprintln!("{e:#}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    info!("ha-franklin v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = match load(args).await {
        Ok(settings) => settings,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match &cli.command {
        Command::Check(_) => check(settings).await,
        Command::Monitor(_) => match monitor(settings).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::from(EXIT_CONFIG_ERROR)
            }
        },
    }
}

async fn load(args: &CommonArgs) -> Result<LoadedSettings> {
    let overrides = TargetSettings::from(&args.target);
    let settings = load_settings(&args.settings_file, &overrides)
        .await
        .with_context(|| format!("Failed to load settings from {}", args.settings_file.display()))?;
    debug!("Settings: {:?}", settings);
    Ok(settings)
}

async fn check(settings: LoadedSettings) -> ExitCode {
    let statuses = check_targets(&LpstatQuery::default(), &settings.targets).await;
    if statuses.is_empty() {
        error!("No checkable print queue definitions (need cupsd_server and cupsd_queue_name)");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    for status in &statuses {
        println!("{status}");
    }
    ExitCode::from(exit_code(&statuses))
}

async fn monitor(settings: LoadedSettings) -> Result<()> {
    let context = MonitorContext {
        query: Arc::new(LpstatQuery::default()),
        connector: Arc::new(MqttConnector),
        discovery: DiscoveryConfig::default(),
    };
    let fleet = Fleet::new(context, CancellationToken::new());
    tokio::spawn(cancel_on_signal(fleet.shutdown_token()));

    println!("Monitoring {} print queue(s)", settings.targets.len());
    let settings_mode = settings.mode;
    let report = fleet.run(settings.targets).await;
    // Each loop validates its own settings, so a lone bad target ends here.
    if report.failed() > 0 && report.failed() == report.exits.len() {
        match settings_mode {
            SettingsMode::Single => anyhow::bail!("Invalid settings or broker unavailable"),
            SettingsMode::Fleet => anyhow::bail!("Every monitor loop failed"),
        }
    }
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested, stopping monitor loops");
    shutdown.cancel();
}
