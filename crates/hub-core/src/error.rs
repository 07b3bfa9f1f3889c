//! Status taxonomy shared by the runtime and plugins

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for synchronous runtime operations
///
/// `Ok` means the request was accepted. For operations that finish
/// asynchronously the real outcome is delivered later as an event carrying a
/// [`ThingError`] status.
pub type ThingResult<T> = Result<T, ThingError>;

/// Outcome of a device operation
///
/// Used both as the error half of [`ThingResult`] and as the completion
/// status plugins hand back through setup, pairing, discovery and action
/// transactions. `NoError` only appears as a completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThingError {
    #[error("no error")]
    NoError,

    #[error("device class not found")]
    ClassNotFound,

    #[error("plugin not found")]
    PluginNotFound,

    #[error("vendor not found")]
    VendorNotFound,

    #[error("required hardware is not available")]
    HardwareNotAvailable,

    #[error("hardware failure")]
    HardwareFailure,

    #[error("missing parameter")]
    MissingParameter,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("a device with this id already exists")]
    DuplicateUuid,

    #[error("device not found")]
    DeviceNotFound,

    #[error("device descriptor not found")]
    DeviceDescriptorNotFound,

    #[error("device is busy with another setup or removal")]
    DeviceInUse,

    #[error("creation method not supported by this device class")]
    CreationMethodNotSupported,

    #[error("setup method not supported by this device class")]
    SetupMethodNotSupported,

    #[error("setup failed")]
    SetupFailed,

    #[error("setup accepted, waiting for the plugin to finish")]
    AsyncSetupInProgress,

    #[error("pairing transaction not found")]
    PairingTransactionNotFound,

    #[error("authentication failure")]
    AuthenticationFailure,

    #[error("action type not found")]
    ActionTypeNotFound,

    #[error("state type not found")]
    StateTypeNotFound,

    #[error("event type not found")]
    EventTypeNotFound,

    #[error("item not found")]
    ItemNotFound,

    #[error("operation not supported")]
    Unsupported,
}

impl ThingError {
    /// True for the success status
    pub fn is_ok(self) -> bool {
        self == ThingError::NoError
    }

    /// Convert a completion status into a result
    pub fn into_result(self) -> ThingResult<()> {
        match self {
            ThingError::NoError => Ok(()),
            other => Err(other),
        }
    }
}

impl From<ThingResult<()>> for ThingError {
    fn from(result: ThingResult<()>) -> Self {
        match result {
            Ok(()) => ThingError::NoError,
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert_eq!(ThingError::NoError.into_result(), Ok(()));
        assert_eq!(
            ThingError::SetupFailed.into_result(),
            Err(ThingError::SetupFailed)
        );
        assert_eq!(ThingError::from(Err(ThingError::DeviceNotFound)), ThingError::DeviceNotFound);
        assert!(ThingError::from(Ok(())).is_ok());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ThingError::DuplicateUuid).unwrap();
        assert_eq!(json, "\"duplicate_uuid\"");
        let parsed: ThingError = serde_json::from_str("\"async_setup_in_progress\"").unwrap();
        assert_eq!(parsed, ThingError::AsyncSetupInProgress);
    }

    #[test]
    fn test_display() {
        assert_eq!(ThingError::DeviceNotFound.to_string(), "device not found");
    }
}
