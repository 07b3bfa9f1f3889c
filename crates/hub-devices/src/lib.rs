//! Device Integration Runtime
//!
//! Hosts device plugins and drives the lifecycle of configured devices:
//! discovery, creation, asynchronous setup, pairing, reconfiguration and
//! removal. Outcomes are published on the event bus as the typed events in
//! [`hub_core::events`].
//!
//! # Example
//!
//! ```ignore
//! let bus = Arc::new(EventBus::new());
//! let hardware = Arc::new(HardwareManager::new().with_timers(true));
//! let mut manager = DeviceManager::new(bus.clone(), hardware);
//! manager.register_plugin(Box::new(AlarmPlugin::default()))?;
//!
//! let runtime = DeviceRuntime::spawn(manager);
//! let handle = runtime.handle();
//! handle
//!     .add_configured_device(alarm_class, "Wake", ParamSource::Params(params), None)
//!     .await?;
//! ```

mod catalog;
mod manager;
mod plugin;
mod runtime;
mod transaction;

pub use catalog::DeviceClassCatalog;
pub use manager::{DeviceManager, PairingStep, ParamSource, PluginInfo};
pub use plugin::{DevicePlugin, PluginCapabilities, PluginContext, PluginHandle, SetupStatus};
pub use runtime::{DeviceRuntime, RuntimeError, RuntimeHandle, RuntimeResult};
pub use transaction::{
    ActionInfo, DiscoveryInfo, PairingInfo, PairingPhase, RuntimeMessage, SetupInfo,
};
