//! Hardware resources for hub plugins
//!
//! The centerpiece is the [`BusManager`]: one per bus kind (I2C, SPI), it
//! opens peripherals on behalf of plugins, runs one worker thread per open
//! device for blocking I/O, serializes writes per device and hands read
//! results back to the control thread through [`BusManager::dispatch_pending`].
//!
//! [`HardwareManager`] bundles the bus managers with the other resources a
//! plugin may declare it needs (network, timers).

pub mod bus;
pub mod device;
pub mod error;
pub mod manager;
pub mod mock;
pub mod port;
pub mod resource;

pub use bus::{BusDeviceKey, BusKind, DEFAULT_POLL_INTERVAL};
pub use device::BusDevice;
pub use error::{HardwareError, Result};
pub use manager::{BusManager, ScanResult};
pub use port::{BusPort, DevfsBackend, PortBackend};
pub use resource::{HardwareManager, HardwareResource};
