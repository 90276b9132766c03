//! CLI entry point for hwsync.
//!
//! Provides:
//! - `check`: load and validate a configuration file, then summarize it
//! - `simulate`: run the configured devices against in-memory mock endpoints
//!   and log every status change, to tune polling periods and miss thresholds
//!   without hardware
//!
//! # Usage
//!
//! ```bash
//! hwsync check config/hwsync.toml
//! hwsync simulate config/hwsync.toml --duration 2m --silent dsp
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hwsync::config::HwSyncConfig;
use hwsync::endpoint::CommandEndpoint;
use hwsync::logging::{self, LoggingConfig, OutputFormat};
use hwsync::mock::MockEndpoint;
use hwsync::{DeviceRegistry, PollingMode, Qualifier, Value, CONNECTION_STATUS};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hwsync")]
#[command(about = "Device state synchronization and adaptive polling", long_about = None)]
struct Cli {
    /// Log line format
    #[arg(long, value_enum, default_value_t = OutputFormat::Compact, global = true)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Check {
        /// Path to the TOML configuration
        config: PathBuf,

        /// Print the effective configuration after defaults and overrides
        #[arg(long)]
        print: bool,
    },

    /// Poll the configured devices through mock endpoints
    Simulate {
        /// Path to the TOML configuration
        config: PathBuf,

        /// How long to run
        #[arg(long, default_value = "1m", value_parser = parse_duration)]
        duration: Duration,

        /// Override the initial polling mode (active, inactive)
        #[arg(long, value_parser = parse_mode)]
        mode: Option<PollingMode>,

        /// Devices that never answer
        #[arg(long)]
        silent: Vec<String>,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> Result<PollingMode, String> {
    s.parse().map_err(|e: hwsync::SyncError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config, print } => check(config, print, cli.log_format),
        Commands::Simulate {
            config,
            duration,
            mode,
            silent,
        } => simulate(config, duration, mode, silent, cli.log_format).await,
    }
}

fn load(path: &Path, format: OutputFormat) -> Result<HwSyncConfig> {
    let config = HwSyncConfig::load_from(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    logging::init(LoggingConfig::from_config(&config)?.with_format(format))?;
    config.validate()?;
    Ok(config)
}

fn check(path: PathBuf, print: bool, format: OutputFormat) -> Result<()> {
    let config = load(&path, format)?;

    println!("{}: OK", config.application.name);
    println!(
        "  polling: active tick {}, inactive tick {}, starts {}",
        humantime_serde::re::humantime::format_duration(config.polling.active_tick),
        humantime_serde::re::humantime::format_duration(config.polling.inactive_tick),
        config.polling.initial_mode,
    );
    for device in &config.devices {
        println!(
            "  {} ({}): {} commands, {} polled{}",
            device.id,
            device.display_name(),
            device.commands.len(),
            device.polling.len(),
            if device.unidirectional { ", send-only" } else { "" },
        );
    }

    if print {
        println!();
        print!(
            "{}",
            toml::to_string_pretty(&config).context("Failed to render configuration")?
        );
    }
    Ok(())
}

async fn simulate(
    path: PathBuf,
    duration: Duration,
    mode: Option<PollingMode>,
    silent: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = load(&path, format)?;
    if let Some(mode) = mode {
        config.polling.initial_mode = mode.to_string();
    }

    let mut mocks: HashMap<String, Arc<MockEndpoint>> = HashMap::new();
    let registry = DeviceRegistry::from_config(&config, |device| {
        let mock = Arc::new(MockEndpoint::new());
        for spec in &device.polling {
            let qualifier = spec.qualifier.clone().unwrap_or_default();
            mock.respond_to(&spec.command, &qualifier, Value::Int(0));
        }
        if silent.contains(&device.id) {
            mock.go_silent();
        }
        mocks.insert(device.id.clone(), mock.clone());
        let endpoint: Arc<dyn CommandEndpoint> = mock;
        Ok(endpoint)
    })?;

    for device in &config.devices {
        let Some(controller) = registry.get(&device.id) else {
            continue;
        };
        let id = device.id.clone();
        controller.subscribe_status(CONNECTION_STATUS, &Qualifier::new(), move |_, value, _| {
            tracing::info!(device = %id, state = %value, "Connection changed");
        })?;
        for spec in &device.polling {
            let id = device.id.clone();
            let qualifier = spec.qualifier.clone().unwrap_or_default();
            controller.subscribe_status(&spec.command, &qualifier, move |command, value, q| {
                tracing::info!(device = %id, command, qualifier = %q, %value, "Status changed");
            })?;
        }
    }

    tracing::info!(devices = registry.len(), ?duration, "Starting simulation");
    let driver = registry.start().await?;

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    registry.shutdown();
    driver.await.context("Polling driver panicked")?;

    let report: Vec<serde_json::Value> = registry
        .list_devices()
        .into_iter()
        .map(|info| {
            let status: Vec<serde_json::Value> = registry
                .get(&info.id)
                .map(|device| device.status_snapshot())
                .unwrap_or_default()
                .into_iter()
                .map(|entry| {
                    serde_json::json!({
                        "command": entry.command,
                        "qualifier": entry.qualifier,
                        "value": entry.value,
                    })
                })
                .collect();
            serde_json::json!({
                "id": info.id,
                "connection": info.connection,
                "queries": mocks.get(&info.id).map(|m| m.queries()).unwrap_or_default(),
                "status": status,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
