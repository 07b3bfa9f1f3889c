//! Bus kinds, addressing rules and device keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{HardwareError, Result};

/// Polling interval used when a plugin does not ask for one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// 7-bit I2C addresses outside the reserved blocks
const I2C_ADDRESSES: RangeInclusive<u16> = 0x03..=0x77;

/// SPI chip-select indices
const SPI_ADDRESSES: RangeInclusive<u16> = 0..=255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    I2c,
    Spi,
}

impl BusKind {
    /// Addresses a slave on this bus may use
    pub fn address_range(self) -> RangeInclusive<u16> {
        match self {
            BusKind::I2c => I2C_ADDRESSES,
            BusKind::Spi => SPI_ADDRESSES,
        }
    }

    /// File name prefix of this bus's device nodes (`/dev/i2c-1`, `/dev/spidev0.0`)
    pub fn port_prefix(self) -> &'static str {
        match self {
            BusKind::I2c => "i2c-",
            BusKind::Spi => "spidev",
        }
    }

    pub fn validate_address(self, address: u16) -> Result<()> {
        if self.address_range().contains(&address) {
            Ok(())
        } else {
            Err(HardwareError::InvalidAddress {
                kind: self,
                address,
            })
        }
    }

    /// Port names are bare file names inside the device directory
    pub fn validate_port_name(self, port_name: &str) -> Result<()> {
        let valid = !port_name.is_empty()
            && !port_name.contains('/')
            && port_name != "."
            && port_name != "..";
        if valid {
            Ok(())
        } else {
            Err(HardwareError::InvalidPortName {
                port: port_name.to_string(),
            })
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::I2c => f.write_str("I2C"),
            BusKind::Spi => f.write_str("SPI"),
        }
    }
}

/// Identity of one peripheral on a bus: kind, port and slave address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusDeviceKey {
    pub kind: BusKind,
    pub port_name: String,
    pub address: u16,
}

impl BusDeviceKey {
    pub fn new(kind: BusKind, port_name: impl Into<String>, address: u16) -> Self {
        Self {
            kind,
            port_name: port_name.into(),
            address,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.kind.validate_port_name(&self.port_name)?;
        self.kind.validate_address(self.address)
    }
}

impl fmt::Display for BusDeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Device(Port: {}, Address: 0x{:02x})",
            self.kind, self.port_name, self.address
        )
    }
}
