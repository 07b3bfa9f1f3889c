//! Error types for bus operations.

use crate::bus::BusKind;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors returned by bus managers and port backends.
///
/// These are always scoped to one bus device or port; none of them is
/// fatal to the manager.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Port not found: {port}")]
    PortNotFound { port: String },

    #[error("Invalid port name '{port}'")]
    InvalidPortName { port: String },

    #[error("Invalid {kind} address 0x{address:02x}")]
    InvalidAddress { kind: BusKind, address: u16 },

    #[error("Device not open: {device}")]
    NotOpen { device: String },

    #[error("Device already open: {device}")]
    AlreadyOpen { device: String },

    /// The worker of an earlier open is still finishing an I/O call
    #[error("Device still closing: {device}")]
    Closing { device: String },

    /// The backend cannot perform this operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn port_not_found(port: impl Into<String>) -> Self {
        Self::PortNotFound { port: port.into() }
    }

    pub fn not_open(device: impl ToString) -> Self {
        Self::NotOpen {
            device: device.to_string(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }
}
