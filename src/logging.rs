//! Structured logging setup.
//!
//! Library code only emits `tracing` events and spans; installing a
//! subscriber is the binary's job. [`init_from_config`] reads the level from
//! [`HwSyncConfig`], and `RUST_LOG` overrides it when set.
//!
//! # Example
//! ```no_run
//! use hwsync::{config::HwSyncConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HwSyncConfig::load_from("hwsync.toml")?;
//! logging::init_from_config(&config)?;
//! tracing::info!(devices = config.devices.len(), "Configuration loaded");
//! # Ok(())
//! # }
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

use crate::config::HwSyncConfig;
use crate::error::{SyncError, SyncResult};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, colored (development)
    #[default]
    Pretty,
    /// Single-line, no colors (production consoles)
    Compact,
    /// One JSON object per line (log aggregation)
    Json,
}

/// Logging options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Log span open/close (shows poll and command durations)
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// ANSI colors (pretty format only)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Options at `level` with default formatting.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Options from the `[application]` section.
    pub fn from_config(config: &HwSyncConfig) -> SyncResult<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber using the configured log level.
pub fn init_from_config(config: &HwSyncConfig) -> SyncResult<()> {
    init(LoggingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Calling this when a subscriber is already installed is not an error, so
/// tests and embedding applications can call it freely.
pub fn init(config: LoggingConfig) -> SyncResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_target(true);

    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).with_filter(filter).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        OutputFormat::Json => base.json().with_filter(filter).boxed(),
    };

    tolerate_existing(tracing_subscriber::registry().with(layer).try_init())
}

fn tolerate_existing(result: Result<(), TryInitError>) -> SyncResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("global default trace dispatcher has already been set") => {
            Ok(())
        }
        Err(e) => Err(SyncError::Configuration(format!(
            "Failed to initialize logging: {e}"
        ))),
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> SyncResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(SyncError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}
