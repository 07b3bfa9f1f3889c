//! YAML configuration loading for the hub
//!
//! Supported custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use hub_config::HubConfig;
//!
//! let config = HubConfig::load("/etc/hub")?;
//! println!("{} polls i2c every {} ms", config.name, config.hardware.i2c.poll_interval_ms);
//! ```

mod error;
mod hub_config;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use hub_config::{
    BusConfig, EventBusConfig, HardwareConfig, HubConfig, LoggingConfig, CONFIG_FILE,
};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};
pub use secrets::{Secrets, SECRETS_FILE};

pub use serde_yaml::Value;
