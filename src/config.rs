//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `HWSYNC_`, using `__` as the
//!    nesting separator (e.g. `HWSYNC_APPLICATION__LOG_LEVEL=debug`)
//!
//! Durations are human readable (`"10s"`, `"2m"`, `"500ms"`).
//!
//! # Example
//! ```no_run
//! use hwsync::config::HwSyncConfig;
//!
//! let config = HwSyncConfig::load_from("config/hwsync.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), hwsync::SyncError>(())
//! ```
//!
//! # File layout
//! ```toml
//! [application]
//! name = "Boardroom"
//! log_level = "info"
//!
//! [polling]
//! active_tick = "10s"
//! inactive_tick = "10m"
//!
//! [[devices]]
//! id = "dsp"
//! miss_threshold = 15
//! response_timeout = "1s"
//!
//! [[devices.commands]]
//! name = "Volume"
//! qualifiers = ["Device ID"]
//!
//! [[devices.polling]]
//! command = "Volume"
//! qualifier = { "Device ID" = "2" }
//! active = "5s"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::command::{CommandDescriptor, CONNECTION_STATUS};
use crate::error::{SyncError, SyncResult};
use crate::liveness::DEFAULT_MISS_THRESHOLD;
use crate::scheduler::{PollingMode, SchedulerConfig};
use crate::value::Qualifier;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwSyncConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Polling scheduler settings
    #[serde(default)]
    pub polling: SchedulerConfig,
    /// Device definitions
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Static settings for one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Unique device identifier
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Consecutive unanswered polls tolerated before disconnecting
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
    /// How long to wait for each reply
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,
    /// Send-only device: never polled, always reported connected
    #[serde(default)]
    pub unidirectional: bool,
    /// Declared commands
    #[serde(default)]
    pub commands: Vec<CommandDescriptor>,
    /// Polling entries installed when the device is registered
    #[serde(default)]
    pub polling: Vec<PollingSpec>,
}

impl DeviceSettings {
    /// Minimal settings: default threshold and timeout, no commands.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            miss_threshold: default_miss_threshold(),
            response_timeout: default_response_timeout(),
            unidirectional: false,
            commands: Vec::new(),
            polling: Vec::new(),
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One polling entry as configured.
///
/// `None` durations fall back to the scheduler defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSpec {
    /// Command to poll
    pub command: String,
    /// Qualifier passed to every poll
    #[serde(default)]
    pub qualifier: Option<Qualifier>,
    /// Period while the scheduler is in active mode
    #[serde(default, with = "humantime_serde")]
    pub active: Option<Duration>,
    /// Period while the scheduler is in inactive mode
    #[serde(default, with = "humantime_serde")]
    pub inactive: Option<Duration>,
}

impl PollingSpec {
    /// Entry using default periods and no qualifier.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            qualifier: None,
            active: None,
            inactive: None,
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "hwsync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_miss_threshold() -> u32 {
    DEFAULT_MISS_THRESHOLD
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

impl HwSyncConfig {
    /// Load configuration from a TOML file and `HWSYNC_` environment variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HWSYNC_").split("__"))
            .extract()
            .map_err(SyncError::from)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(source: &str) -> SyncResult<Self> {
        Figment::new()
            .merge(Toml::string(source))
            .extract()
            .map_err(SyncError::from)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SyncResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SyncError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.polling.initial_mode.parse::<PollingMode>()?;
        self.polling.validate()?;

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(&device.id) {
                return Err(SyncError::Configuration(format!(
                    "Duplicate device ID: {}",
                    device.id
                )));
            }
            validate_device(device)?;
        }

        Ok(())
    }

    /// Look up a device by id
    pub fn device(&self, id: &str) -> Option<&DeviceSettings> {
        self.devices.iter().find(|d| d.id == id)
    }
}

fn validate_device(device: &DeviceSettings) -> SyncResult<()> {
    let mut names = HashSet::new();
    for command in &device.commands {
        if command.name == CONNECTION_STATUS {
            return Err(SyncError::Configuration(format!(
                "Device '{}' must not declare the reserved command '{}'",
                device.id, CONNECTION_STATUS
            )));
        }
        if !names.insert(command.name.as_str()) {
            return Err(SyncError::Configuration(format!(
                "Duplicate command '{}' on device '{}'",
                command.name, device.id
            )));
        }
    }

    for entry in &device.polling {
        if !names.contains(entry.command.as_str()) {
            return Err(SyncError::Configuration(format!(
                "Device '{}' polls undeclared command '{}'",
                device.id, entry.command
            )));
        }
        let zero = |d: Option<Duration>| d.is_some_and(|d| d.is_zero());
        if zero(entry.active) || zero(entry.inactive) {
            return Err(SyncError::Configuration(format!(
                "Device '{}' has a zero polling period for '{}'",
                device.id, entry.command
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const SAMPLE: &str = r#"
        [application]
        name = "Boardroom"
        log_level = "debug"

        [polling]
        active_tick = "5s"
        inactive_tick = "5m"
        initial_mode = "inactive"

        [[devices]]
        id = "dsp"
        name = "Ceiling DSP"
        miss_threshold = 3
        response_timeout = "250ms"

        [[devices.commands]]
        name = "Volume"
        qualifiers = ["Device ID"]

        [[devices.commands]]
        name = "Power"

        [[devices.polling]]
        command = "Volume"
        qualifier = { "Device ID" = "2" }
        active = "15s"

        [[devices.polling]]
        command = "Power"

        [[devices]]
        id = "ir_blaster"
        unidirectional = true
    "#;

    #[test]
    fn parses_full_sample() {
        let config = HwSyncConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.name, "Boardroom");
        assert_eq!(config.polling.active_tick, Duration::from_secs(5));
        assert_eq!(config.polling.inactive_tick, Duration::from_secs(300));

        let dsp = config.device("dsp").unwrap();
        assert_eq!(dsp.display_name(), "Ceiling DSP");
        assert_eq!(dsp.miss_threshold, 3);
        assert_eq!(dsp.response_timeout, Duration::from_millis(250));
        assert_eq!(dsp.commands[0].qualifiers, vec!["Device ID".to_string()]);
        assert_eq!(dsp.polling[0].active, Some(Duration::from_secs(15)));
        assert_eq!(dsp.polling[0].inactive, None);
        assert_eq!(
            dsp.polling[0]
                .qualifier
                .as_ref()
                .and_then(|q| q.get("Device ID")),
            Some(&Value::from("2"))
        );
    }

    #[test]
    fn applies_defaults() {
        let config = HwSyncConfig::from_toml_str(SAMPLE).unwrap();
        let blaster = config.device("ir_blaster").unwrap();
        assert!(blaster.unidirectional);
        assert_eq!(blaster.miss_threshold, 15);
        assert_eq!(blaster.response_timeout, Duration::from_secs(1));
        assert_eq!(blaster.display_name(), "ir_blaster");

        let empty = HwSyncConfig::from_toml_str("").unwrap();
        assert_eq!(empty.application.log_level, "info");
        assert_eq!(empty.polling.initial_mode, "active");
        assert!(empty.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = HwSyncConfig::from_toml_str(SAMPLE).unwrap();
        config.application.log_level = "loud".into();
        assert!(matches!(config.validate(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn rejects_invalid_initial_mode() {
        let mut config = HwSyncConfig::from_toml_str(SAMPLE).unwrap();
        config.polling.initial_mode = "turbo".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidMode(_))));
    }

    #[test]
    fn rejects_duplicate_device_ids() {
        let mut config = HwSyncConfig::from_toml_str(SAMPLE).unwrap();
        config.devices.push(DeviceSettings::new("dsp"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_polling_of_undeclared_command() {
        let mut config = HwSyncConfig::from_toml_str(SAMPLE).unwrap();
        config.devices[0].polling.push(PollingSpec::new("Mute"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Mute"));
    }

    #[test]
    fn rejects_reserved_and_duplicate_commands() {
        let mut device = DeviceSettings::new("display");
        device.commands.push(CommandDescriptor::new(CONNECTION_STATUS));
        assert!(validate_device(&device).is_err());

        let mut device = DeviceSettings::new("display");
        device.commands.push(CommandDescriptor::new("Power"));
        device.commands.push(CommandDescriptor::new("Power"));
        assert!(validate_device(&device).is_err());
    }
}
