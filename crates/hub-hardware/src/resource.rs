//! The set of hardware resources available to plugins

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::bus::BusKind;
use crate::manager::BusManager;

/// A resource a plugin may require before it can be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareResource {
    Network,
    Timers,
    I2c,
    Spi,
}

impl fmt::Display for HardwareResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardwareResource::Network => "network",
            HardwareResource::Timers => "timers",
            HardwareResource::I2c => "i2c",
            HardwareResource::Spi => "spi",
        };
        f.write_str(name)
    }
}

/// Hardware resources of this host
///
/// Bus managers added here share one wake-up signal, so the control thread
/// can wait on [`HardwareManager::readings_ready`] for all buses at once.
pub struct HardwareManager {
    network: bool,
    timers: bool,
    i2c: Option<Arc<BusManager>>,
    spi: Option<Arc<BusManager>>,
    readings_ready: Arc<Notify>,
}

impl HardwareManager {
    /// A manager with no resources at all
    pub fn new() -> Self {
        Self {
            network: false,
            timers: false,
            i2c: None,
            spi: None,
            readings_ready: Arc::new(Notify::new()),
        }
    }

    pub fn with_network(mut self, available: bool) -> Self {
        self.network = available;
        self
    }

    pub fn with_timers(mut self, available: bool) -> Self {
        self.timers = available;
        self
    }

    /// Add a bus manager; its readings signal this manager's notify
    pub fn with_bus(mut self, manager: BusManager) -> Self {
        let kind = manager.kind();
        let manager = Arc::new(manager.with_notify(self.readings_ready.clone()));
        match kind {
            BusKind::I2c => self.i2c = Some(manager),
            BusKind::Spi => self.spi = Some(manager),
        }
        self
    }

    pub fn is_available(&self, resource: HardwareResource) -> bool {
        match resource {
            HardwareResource::Network => self.network,
            HardwareResource::Timers => self.timers,
            HardwareResource::I2c => self.i2c.is_some(),
            HardwareResource::Spi => self.spi.is_some(),
        }
    }

    /// First resource in `required` that is missing
    pub fn missing(&self, required: &[HardwareResource]) -> Option<HardwareResource> {
        required.iter().copied().find(|r| !self.is_available(*r))
    }

    pub fn i2c(&self) -> Option<Arc<BusManager>> {
        self.i2c.clone()
    }

    pub fn spi(&self) -> Option<Arc<BusManager>> {
        self.spi.clone()
    }

    pub fn bus(&self, kind: BusKind) -> Option<Arc<BusManager>> {
        match kind {
            BusKind::I2c => self.i2c(),
            BusKind::Spi => self.spi(),
        }
    }

    pub fn readings_ready(&self) -> Arc<Notify> {
        self.readings_ready.clone()
    }

    /// Deliver pending readings of every bus; call from the control thread
    pub fn dispatch_bus_readings(&self) -> usize {
        self.buses().map(|bus| bus.dispatch_pending()).sum()
    }

    pub fn close_all(&self) {
        for bus in self.buses() {
            debug!(kind = %bus.kind(), "Closing all bus devices");
            bus.close_all();
        }
    }

    fn buses(&self) -> impl Iterator<Item = &Arc<BusManager>> {
        self.i2c.iter().chain(self.spi.iter())
    }
}

impl Default for HardwareManager {
    fn default() -> Self {
        Self::new()
    }
}
