//! Device registry.
//!
//! Owns the set of [`HardwareController`]s for one installation and the
//! [`PollingScheduler`] that drives them. Registering a device installs its
//! configured polling entries; unregistering removes them.
//!
//! # Example
//!
//! ```rust,ignore
//! use hwsync::{config::HwSyncConfig, registry::DeviceRegistry};
//!
//! let config = HwSyncConfig::load_from("hwsync.toml")?;
//! let mut registry = DeviceRegistry::from_config(&config, |device| {
//!     Ok(build_endpoint_for(device)?)
//! })?;
//! let driver = registry.start().await?;
//!
//! registry.get("dsp").unwrap().subscribe_status("Power", &Qualifier::new(), |_, v, _| {
//!     println!("DSP power is now {v}");
//! })?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{DeviceSettings, HwSyncConfig};
use crate::controller::HardwareController;
use crate::endpoint::CommandEndpoint;
use crate::error::{SyncError, SyncResult};
use crate::liveness::ConnectionState;
use crate::scheduler::{PollingMode, PollingScheduler, SchedulerConfig};

/// Summary of a registered device (returned by list operations)
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Device identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Declared commands, sorted, including `ConnectionStatus`
    pub commands: Vec<String>,
    /// Inferred connection state
    pub connection: ConnectionState,
    /// Send-only device
    pub unidirectional: bool,
}

/// Central registry of device controllers.
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<HardwareController>>,
    scheduler: Arc<PollingScheduler>,
}

impl DeviceRegistry {
    /// Empty registry with a stopped scheduler.
    ///
    /// # Errors
    /// [`SyncError::Configuration`] if `config` has a zero period.
    pub fn new(config: SchedulerConfig) -> SyncResult<Self> {
        Ok(Self {
            devices: HashMap::new(),
            scheduler: Arc::new(PollingScheduler::new(config)?),
        })
    }

    /// Build every configured device, asking `connect` for its endpoint.
    ///
    /// # Errors
    /// Validation failures, duplicate ids, or the first endpoint `connect`
    /// could not create.
    pub fn from_config<F>(config: &HwSyncConfig, mut connect: F) -> SyncResult<Self>
    where
        F: FnMut(&DeviceSettings) -> anyhow::Result<Arc<dyn CommandEndpoint>>,
    {
        config.validate()?;
        let mut registry = Self::new(config.polling.clone())?;
        for settings in &config.devices {
            let endpoint = connect(settings).map_err(|err| {
                SyncError::Configuration(format!(
                    "Failed to create endpoint for '{}': {err:#}",
                    settings.id
                ))
            })?;
            registry.register(HardwareController::from_settings(settings, endpoint))?;
        }
        Ok(registry)
    }

    /// Add a device and install its polling entries.
    ///
    /// # Errors
    /// [`SyncError::Configuration`] if the id is already registered.
    pub fn register(&mut self, controller: Arc<HardwareController>) -> SyncResult<()> {
        let id = controller.id().to_string();
        if self.devices.contains_key(&id) {
            return Err(SyncError::Configuration(format!(
                "Device '{id}' is already registered"
            )));
        }

        let polled = controller.register_polling(&self.scheduler);
        tracing::info!(device = %id, name = controller.name(), polled, "Registered device");
        self.devices.insert(id, controller);
        Ok(())
    }

    /// Remove a device and its polling entries.
    pub fn unregister(&mut self, id: &str) -> Option<Arc<HardwareController>> {
        let controller = self.devices.remove(id)?;
        controller.unregister_polling(&self.scheduler);
        tracing::info!(device = %id, "Unregistered device");
        Some(controller)
    }

    /// Controller for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<HardwareController>> {
        self.devices.get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no devices are registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Summaries of all devices, sorted by id.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> = self
            .devices
            .values()
            .map(|device| {
                let mut commands: Vec<String> =
                    device.commands().iter().map(|c| c.name.clone()).collect();
                commands.sort();
                DeviceInfo {
                    id: device.id().to_string(),
                    name: device.name().to_string(),
                    commands,
                    connection: device.connection_state(),
                    unidirectional: device.is_unidirectional(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Shared polling scheduler.
    pub fn scheduler(&self) -> &Arc<PollingScheduler> {
        &self.scheduler
    }

    /// Poll every entry once, then spawn the scheduler driver and enter the
    /// configured initial mode.
    ///
    /// # Errors
    /// [`SyncError::InvalidMode`] if the configured initial mode is invalid.
    pub async fn start(&self) -> SyncResult<JoinHandle<()>> {
        let mode: PollingMode = self.scheduler.config().initial_mode.parse()?;
        self.scheduler.poll_everything().await;
        let driver = self.scheduler.spawn();
        self.scheduler.start_polling(mode);
        Ok(driver)
    }

    /// Stop polling and ask the driver to exit.
    pub fn shutdown(&self) {
        self.scheduler.stop_polling();
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEndpoint;
    use crate::scheduler::SchedulerMode;
    use crate::value::{Qualifier, Value};

    const CONFIG: &str = r#"
        [polling]
        initial_mode = "inactive"

        [[devices]]
        id = "display"
        name = "Lobby Display"
        [[devices.commands]]
        name = "Power"
        [[devices.polling]]
        command = "Power"

        [[devices]]
        id = "ir"
        unidirectional = true
        [[devices.commands]]
        name = "Power"
        [[devices.polling]]
        command = "Power"
    "#;

    fn mock_connect(_: &DeviceSettings) -> anyhow::Result<Arc<dyn CommandEndpoint>> {
        Ok(Arc::new(MockEndpoint::new()))
    }

    #[test]
    fn builds_devices_and_polling_from_config() {
        let config = HwSyncConfig::from_toml_str(CONFIG).unwrap();
        let registry = DeviceRegistry::from_config(&config, mock_connect).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("display"));
        // Send-only devices are not polled.
        assert_eq!(registry.scheduler().len(), 1);

        let infos = registry.list_devices();
        assert_eq!(infos[0].id, "display");
        assert_eq!(infos[0].name, "Lobby Display");
        assert_eq!(infos[0].commands, vec!["ConnectionStatus", "Power"]);
        assert!(infos[1].unidirectional);
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = DeviceRegistry::new(SchedulerConfig::default()).unwrap();
        let endpoint: Arc<dyn CommandEndpoint> = Arc::new(MockEndpoint::new());
        registry
            .register(HardwareController::builder("dsp", endpoint.clone()).build())
            .unwrap();
        assert!(registry
            .register(HardwareController::builder("dsp", endpoint).build())
            .is_err());
    }

    #[test]
    fn unregister_removes_polling() {
        let config = HwSyncConfig::from_toml_str(CONFIG).unwrap();
        let mut registry = DeviceRegistry::from_config(&config, mock_connect).unwrap();

        assert!(registry.unregister("display").is_some());
        assert!(registry.unregister("display").is_none());
        assert!(registry.scheduler().is_empty());
    }

    #[test]
    fn endpoint_failure_names_the_device() {
        let config = HwSyncConfig::from_toml_str(CONFIG).unwrap();
        let result = DeviceRegistry::from_config(&config, |_| Err(anyhow::anyhow!("port busy")));
        let err = result.err().unwrap().to_string();
        assert!(err.contains("display"));
        assert!(err.contains("port busy"));
    }

    #[tokio::test]
    async fn start_refreshes_everything_and_enters_initial_mode() {
        let config = HwSyncConfig::from_toml_str(CONFIG).unwrap();
        let display = Arc::new(MockEndpoint::new());
        display.respond("Power", "On");
        let endpoint = display.clone();
        let registry = DeviceRegistry::from_config(&config, move |settings| {
            Ok(match settings.id.as_str() {
                "display" => endpoint.clone() as Arc<dyn CommandEndpoint>,
                _ => Arc::new(MockEndpoint::new()) as Arc<dyn CommandEndpoint>,
            })
        })
        .unwrap();

        let driver = registry.start().await.unwrap();
        assert_eq!(registry.scheduler().mode(), SchedulerMode::Inactive);
        assert_eq!(display.queries(), 1);
        assert_eq!(
            registry.get("display").unwrap().read_status("Power", &Qualifier::new()),
            Some(Value::from("On"))
        );

        registry.shutdown();
        driver.await.unwrap();
        assert_eq!(registry.scheduler().mode(), SchedulerMode::Stopped);
    }
}
