//! Discovery candidates

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceClassId, DeviceDescriptorId, DeviceId};
use crate::param::ParamList;

/// A candidate device produced by discovery or announced as an auto device
///
/// Descriptors are ephemeral: the runtime keeps the latest discovery run per
/// class and forgets a descriptor once it is consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceDescriptorId,
    pub device_class_id: DeviceClassId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: ParamList,
    /// For auto devices: the device the new one hangs under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<DeviceId>,
    /// Set when the candidate is an already configured device, so picking it
    /// reconfigures that device instead of adding a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

impl DeviceDescriptor {
    pub fn new(device_class_id: DeviceClassId, title: impl Into<String>) -> Self {
        Self {
            id: DeviceDescriptorId::generate(),
            device_class_id,
            title: title.into(),
            description: String::new(),
            params: ParamList::new(),
            parent_id: None,
            device_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: ParamList) -> Self {
        self.params = params;
        self
    }

    pub fn with_parent(mut self, parent_id: DeviceId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn for_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }
}
