//! Typed identifiers
//!
//! Every identity in the runtime is a UUID wrapped in its own newtype so a
//! device id can never be passed where a device class id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for identifiers that fail to parse
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("'{0}' is not a valid UUID")]
    InvalidUuid(String),
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The nil identifier, used as "unset"
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
                if trimmed.is_empty() {
                    return Err(IdError::Empty);
                }
                Uuid::parse_str(trimmed)
                    .map(Self)
                    .map_err(|_| IdError::InvalidUuid(s.to_string()))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identity of one configured device
    DeviceId
);
uuid_id!(
    /// Identity of a device class in the catalog
    DeviceClassId
);
uuid_id!(PluginId);
uuid_id!(VendorId);
uuid_id!(ParamTypeId);
uuid_id!(StateTypeId);
uuid_id!(EventTypeId);
uuid_id!(ActionTypeId);
uuid_id!(
    /// Identity of an ephemeral discovery candidate
    DeviceDescriptorId
);
uuid_id!(PairingTransactionId);
uuid_id!(
    /// Identity of one in-flight setup transaction
    SetupTransactionId
);
uuid_id!(ActionId);

/// Identifier of a node in a plugin's browse tree
///
/// Browser item ids are opaque strings chosen by the plugin (often paths or
/// URIs), so unlike the other identifiers they are not UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrowserItemId(String);

impl BrowserItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The empty id addresses the root of the browse tree
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for BrowserItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BrowserItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for BrowserItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn test_parse_with_braces() {
        let id: DeviceClassId = "{3f6e9a5c-8b7f-4e2a-9d1b-2f5c7a8e9b01}".parse().unwrap();
        assert_eq!(id.to_string(), "3f6e9a5c-8b7f-4e2a-9d1b-2f5c7a8e9b01");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<PluginId>(), Err(IdError::Empty));
        assert!(matches!(
            "not-a-uuid".parse::<PluginId>(),
            Err(IdError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = StateTypeId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_browser_item_root() {
        assert!(BrowserItemId::default().is_root());
        assert!(!BrowserItemId::from("/music").is_root());
    }
}
