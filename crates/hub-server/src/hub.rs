//! Wiring the runtime from a [`HubConfig`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use hub_config::{BusConfig, HardwareConfig, HubConfig};
use hub_core::{ParamList, ParamType};
use hub_devices::{DeviceManager, DevicePlugin};
use hub_event_bus::{EventBus, SharedEventBus};
use hub_hardware::{BusKind, BusManager, DevfsBackend, HardwareManager};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

/// Hardware resources as configured, with devfs-backed bus managers
pub fn build_hardware(config: &HardwareConfig) -> HardwareManager {
    let mut hardware = HardwareManager::new()
        .with_network(config.network)
        .with_timers(config.timers);
    for (kind, bus) in [(BusKind::I2c, &config.i2c), (BusKind::Spi, &config.spi)] {
        if bus.enabled {
            hardware = hardware.with_bus(bus_manager(kind, bus));
        }
    }
    hardware
}

fn bus_manager(kind: BusKind, config: &BusConfig) -> BusManager {
    info!(%kind, dev_dir = %config.dev_dir.display(), "Enabling bus");
    BusManager::new(kind, Arc::new(DevfsBackend::new(&config.dev_dir)))
        .with_default_interval(Duration::from_millis(config.poll_interval_ms))
}

/// Map configured values, keyed by param name, onto a plugin's param types
pub fn plugin_params(types: &[ParamType], values: &IndexMap<String, Value>) -> ParamList {
    let mut params = ParamList::new();
    for (name, value) in values {
        match types.iter().find(|t| &t.name == name) {
            Some(param_type) => {
                params.set(param_type.id, value.clone());
            }
            None => warn!(param = %name, "Ignoring unknown plugin config value"),
        }
    }
    params
}

/// Create the event bus and device manager and load `plugins`.
///
/// A plugin that fails to register is skipped. Plugin configuration from
/// the config file is applied right after registration.
pub fn build_manager(
    config: &HubConfig,
    plugins: Vec<Box<dyn DevicePlugin>>,
) -> Result<(SharedEventBus, DeviceManager)> {
    let bus = Arc::new(EventBus::with_capacity(config.event_bus.capacity));
    let hardware = Arc::new(build_hardware(&config.hardware));
    let mut manager = DeviceManager::new(bus.clone(), hardware);

    for plugin in plugins {
        let name = plugin.name().to_string();
        if let Err(e) = manager.register_plugin(plugin) {
            warn!(plugin = %name, error = %e, "Plugin not loaded");
        }
    }

    for (name, values) in &config.plugins {
        let Some(plugin_id) = manager.find_plugin_by_name(name) else {
            warn!(plugin = %name, "Configuration for unknown plugin");
            continue;
        };
        let types = manager.plugin_configuration_description(&plugin_id)?;
        manager
            .set_plugin_config(plugin_id, plugin_params(&types, values))
            .map_err(|e| anyhow!("invalid configuration for plugin {}: {}", name, e))?;
    }

    Ok((bus, manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{DeviceClass, ParamTypeId, PluginId, ThingError, ValueType, Vendor};
    use hub_devices::{SetupInfo, SetupStatus};
    use hub_hardware::HardwareResource;
    use serde_json::json;

    struct Clock {
        id: PluginId,
        interval: ParamTypeId,
    }

    impl DevicePlugin for Clock {
        fn id(&self) -> PluginId {
            self.id
        }

        fn name(&self) -> &str {
            "clock"
        }

        fn vendors(&self) -> Vec<Vendor> {
            Vec::new()
        }

        fn device_classes(&self) -> Vec<DeviceClass> {
            Vec::new()
        }

        fn required_hardware(&self) -> Vec<HardwareResource> {
            vec![HardwareResource::Timers]
        }

        fn configuration_description(&self) -> Vec<ParamType> {
            vec![ParamType::new(self.interval, "interval", ValueType::Int)
                .with_default(60)
                .with_range(1.0, 3600.0)]
        }

        fn setup_device(&mut self, info: SetupInfo) -> SetupStatus {
            info.finish(ThingError::NoError, "");
            SetupStatus::Success
        }
    }

    fn clock() -> (Box<dyn DevicePlugin>, PluginId, ParamTypeId) {
        let id = PluginId::generate();
        let interval = ParamTypeId::generate();
        (Box::new(Clock { id, interval }), id, interval)
    }

    fn config(yaml: &str) -> HubConfig {
        let dir = tempfile::tempdir().unwrap();
        let value = hub_config::load_yaml_string(dir.path(), yaml, "hub.yaml").unwrap();
        HubConfig::from_value(value).unwrap()
    }

    #[test]
    fn test_plugin_config_applied_by_name() {
        let (plugin, id, interval) = clock();
        let config = config("plugins:\n  clock:\n    interval: 15\n    colour: red\n");

        let (_bus, manager) = build_manager(&config, vec![plugin]).unwrap();
        let params = manager.plugin_config(&id).unwrap();
        assert_eq!(params.get(&interval), Some(&json!(15)));
    }

    #[test]
    fn test_invalid_plugin_config_is_an_error() {
        let (plugin, _, _) = clock();
        let config = config("plugins:\n  clock:\n    interval: 0\n");
        assert!(build_manager(&config, vec![plugin]).is_err());
    }

    #[test]
    fn test_plugin_missing_hardware_is_skipped() {
        let (plugin, _, _) = clock();
        let config = config("hardware:\n  timers: false\n");
        let (_bus, manager) = build_manager(&config, vec![plugin]).unwrap();
        assert!(manager.plugins().is_empty());
    }

    #[test]
    fn test_buses_follow_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("i2c-1"), b"").unwrap();
        let yaml = format!(
            "hardware:\n  i2c:\n    dev_dir: {}\n  spi:\n    enabled: false\n",
            dir.path().display()
        );

        let hardware = build_hardware(&config(&yaml).hardware);
        assert!(hardware.is_available(HardwareResource::I2c));
        assert!(!hardware.is_available(HardwareResource::Spi));
        let i2c = hardware.i2c().unwrap();
        assert_eq!(i2c.available_ports(), vec!["i2c-1".to_string()]);
        assert_eq!(i2c.default_interval(), Duration::from_millis(1000));
    }
}
