//! Loading configuration files and building a registry from them.

use hwsync::config::HwSyncConfig;
use hwsync::endpoint::CommandEndpoint;
use hwsync::mock::MockEndpoint;
use hwsync::{DeviceRegistry, Qualifier, SyncError};
use serial_test::serial;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const BOARDROOM: &str = r#"
[application]
name = "Boardroom"

[polling]
active_tick = "5s"
inactive_tick = "10m"

[[devices]]
id = "dsp"
name = "Ceiling DSP"
miss_threshold = 4
response_timeout = "300ms"

[[devices.commands]]
name = "Volume"
qualifiers = ["Device ID"]

[[devices.commands]]
name = "Mute"
qualifiers = ["Device ID"]

[[devices.polling]]
command = "Volume"
qualifier = { "Device ID" = "2" }
active = "5s"
inactive = "5m"

[[devices]]
id = "display"

[[devices.commands]]
name = "Power"

[[devices.polling]]
command = "Power"
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn mock_connect(_: &hwsync::config::DeviceSettings) -> anyhow::Result<Arc<dyn CommandEndpoint>> {
    Ok(Arc::new(MockEndpoint::new()))
}

#[test]
#[serial]
fn loads_file_with_defaults() {
    let file = write_config(BOARDROOM);
    let config = HwSyncConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.name, "Boardroom");
    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.polling.active_tick, Duration::from_secs(5));
    assert_eq!(config.polling.default_inactive, Duration::from_secs(600));

    let dsp = config.device("dsp").unwrap();
    assert_eq!(dsp.response_timeout, Duration::from_millis(300));
    assert_eq!(dsp.polling[0].inactive, Some(Duration::from_secs(300)));
    assert_eq!(config.device("display").unwrap().miss_threshold, 15);
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = write_config(BOARDROOM);
    std::env::set_var("HWSYNC_APPLICATION__LOG_LEVEL", "warn");
    std::env::set_var("HWSYNC_POLLING__ACTIVE_TICK", "2s");
    let loaded = HwSyncConfig::load_from(file.path());
    std::env::remove_var("HWSYNC_APPLICATION__LOG_LEVEL");
    std::env::remove_var("HWSYNC_POLLING__ACTIVE_TICK");

    let config = loaded.unwrap();
    assert_eq!(config.application.log_level, "warn");
    assert_eq!(config.polling.active_tick, Duration::from_secs(2));
    assert_eq!(config.polling.inactive_tick, Duration::from_secs(600));
}

#[test]
#[serial]
fn malformed_file_is_a_config_error() {
    let file = write_config("[[devices]]\nmiss_threshold = \"lots\"\n");
    assert!(matches!(
        HwSyncConfig::load_from(file.path()),
        Err(SyncError::Config(_))
    ));
}

#[test]
#[serial]
fn registry_wires_devices_and_polling() {
    let file = write_config(BOARDROOM);
    let config = HwSyncConfig::load_from(file.path()).unwrap();
    let registry = DeviceRegistry::from_config(&config, mock_connect).unwrap();

    assert_eq!(registry.len(), 2);
    let entries = registry.scheduler().entries();
    assert_eq!(entries.len(), 2);

    let volume = entries.iter().find(|e| e.command == "Volume").unwrap();
    assert_eq!(volume.target_id, "dsp");
    assert_eq!(volume.qualifier, Qualifier::new().with("Device ID", "2"));
    assert_eq!(volume.active, Duration::from_secs(5));

    let power = entries.iter().find(|e| e.command == "Power").unwrap();
    assert_eq!(power.active, Duration::from_secs(10));
    assert_eq!(power.inactive, Duration::from_secs(600));

    assert_eq!(registry.get("dsp").unwrap().name(), "Ceiling DSP");
}

#[test]
#[serial]
fn invalid_config_is_rejected_before_any_device_is_built() {
    let broken = BOARDROOM.replace("command = \"Power\"", "command = \"Brightness\"");
    let file = write_config(&broken);
    let config = HwSyncConfig::load_from(file.path()).unwrap();

    let mut built = 0;
    let result = DeviceRegistry::from_config(&config, |settings| {
        built += 1;
        mock_connect(settings)
    });
    assert!(matches!(result, Err(SyncError::Configuration(_))));
    assert_eq!(built, 0);
}
