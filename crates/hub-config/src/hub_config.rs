//! Hub configuration model
//!
//! Parses `hub.yaml` from the config directory. Every section is optional;
//! a missing file yields the defaults.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Name of the main configuration file inside the config directory
pub const CONFIG_FILE: &str = "hub.yaml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Plugin name to plugin configuration values, keyed by param name
    #[serde(default)]
    pub plugins: IndexMap<String, IndexMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Which hardware resources the hub provides to plugins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_true")]
    pub network: bool,

    #[serde(default = "default_true")]
    pub timers: bool,

    #[serde(default)]
    pub i2c: BusConfig,

    #[serde(default)]
    pub spi: BusConfig,
}

/// Settings for one bus manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the bus device nodes
    #[serde(default = "default_dev_dir")]
    pub dev_dir: PathBuf,

    /// Polling interval used when a plugin does not ask for one
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dev_dir: default_dev_dir(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            network: true,
            timers: true,
            i2c: BusConfig::default(),
            spi: BusConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            logging: LoggingConfig::default(),
            event_bus: EventBusConfig::default(),
            hardware: HardwareConfig::default(),
            plugins: IndexMap::new(),
        }
    }
}

fn default_name() -> String {
    "hub".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_dev_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_poll_interval() -> u64 {
    1000
}

impl HubConfig {
    /// Load `hub.yaml` from `config_dir`, falling back to defaults when the
    /// file does not exist
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            info!(path = %path.display(), "No hub configuration found, using defaults");
            return Ok(Self::default());
        }

        let value = load_yaml(config_dir, CONFIG_FILE)?;
        Self::from_value(value)
    }

    /// Build from an already tag-processed YAML value
    pub fn from_value(value: serde_yaml::Value) -> ConfigResult<Self> {
        // An empty file parses as null
        let value = if value.is_null() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            value
        };
        let config: HubConfig =
            serde_yaml::from_value(value).map_err(|e| ConfigError::invalid(CONFIG_FILE, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_bus.capacity == 0 {
            return Err(ConfigError::invalid("event_bus.capacity", "must be greater than zero"));
        }
        for (bus, config) in [("i2c", &self.hardware.i2c), ("spi", &self.hardware.spi)] {
            if config.poll_interval_ms == 0 {
                return Err(ConfigError::invalid(
                    format!("hardware.{}.poll_interval_ms", bus),
                    "must be greater than zero",
                ));
            }
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("expected one of {}", LOG_LEVELS.join(", ")),
            ));
        }
        Ok(())
    }

    /// Configuration values for one plugin, if any
    pub fn plugin(&self, name: &str) -> Option<&IndexMap<String, serde_json::Value>> {
        self.plugins.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = HubConfig::load(dir.path()).unwrap();
        assert_eq!(config.name, "hub");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.event_bus.capacity, 1024);
        assert!(config.hardware.network);
        assert!(config.hardware.i2c.enabled);
        assert_eq!(config.hardware.spi.dev_dir, PathBuf::from("/dev"));
        assert_eq!(config.hardware.i2c.poll_interval_ms, 1000);
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let config = HubConfig::load(dir.path()).unwrap();
        assert_eq!(config.name, "hub");
    }

    #[test]
    fn test_full_config() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("secrets.yaml"), "cloud_token: t0k3n\n").unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
name: cellar
logging:
  level: debug
hardware:
  timers: false
  i2c:
    dev_dir: /tmp/fake-dev
    poll_interval_ms: 250
  spi:
    enabled: false
plugins:
  datetime:
    timezone: Europe/Vienna
    token: !secret cloud_token
"#,
        )
        .unwrap();

        let config = HubConfig::load(dir.path()).unwrap();
        assert_eq!(config.name, "cellar");
        assert_eq!(config.logging.level, "debug");
        assert!(!config.hardware.timers);
        assert!(config.hardware.network);
        assert_eq!(config.hardware.i2c.dev_dir, PathBuf::from("/tmp/fake-dev"));
        assert_eq!(config.hardware.i2c.poll_interval_ms, 250);
        assert!(!config.hardware.spi.enabled);

        let datetime = config.plugin("datetime").unwrap();
        assert_eq!(datetime.get("timezone"), Some(&json!("Europe/Vienna")));
        assert_eq!(datetime.get("token"), Some(&json!("t0k3n")));
    }

    #[test]
    fn test_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "hardware:\n  i2c:\n    poll_interval_ms: 0\n",
        )
        .unwrap();
        match HubConfig::load(dir.path()) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "hardware.i2c.poll_interval_ms"),
            other => panic!("expected invalid poll interval, got {:?}", other),
        }

        fs::write(dir.path().join(CONFIG_FILE), "logging:\n  level: loud\n").unwrap();
        match HubConfig::load(dir.path()) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "logging.level"),
            other => panic!("expected invalid log level, got {:?}", other),
        }
    }
}
