//! Actions, device events and browser items

use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, ActionTypeId, BrowserItemId, DeviceId, EventTypeId};
use crate::param::ParamList;

/// A request to make a device do something
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub action_type_id: ActionTypeId,
    pub device_id: DeviceId,
    #[serde(default)]
    pub params: ParamList,
}

impl Action {
    pub fn new(action_type_id: ActionTypeId, device_id: DeviceId) -> Self {
        Self {
            id: ActionId::generate(),
            action_type_id,
            device_id,
            params: ParamList::new(),
        }
    }

    pub fn with_params(mut self, params: ParamList) -> Self {
        self.params = params;
        self
    }
}

/// Something a device reported happening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub event_type_id: EventTypeId,
    pub device_id: DeviceId,
    #[serde(default)]
    pub params: ParamList,
}

impl DeviceEvent {
    pub fn new(event_type_id: EventTypeId, device_id: DeviceId) -> Self {
        Self {
            event_type_id,
            device_id,
            params: ParamList::new(),
        }
    }

    pub fn with_params(mut self, params: ParamList) -> Self {
        self.params = params;
        self
    }
}

/// One node of a plugin's browse tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserItem {
    pub id: BrowserItemId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Can be passed back as a node to browse into
    pub browsable: bool,
    /// Can be handed to an action
    pub executable: bool,
}

impl BrowserItem {
    pub fn new(id: impl Into<BrowserItemId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            browsable: false,
            executable: false,
        }
    }

    pub fn browsable(mut self) -> Self {
        self.browsable = true;
        self
    }

    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }
}
