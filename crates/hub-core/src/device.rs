//! Configured devices

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device_class::DeviceClass;
use crate::error::ThingError;
use crate::ids::{DeviceClassId, DeviceId, PluginId, StateTypeId};
use crate::param::ParamList;
use crate::setup_state::SetupState;

/// One configured instance of a device class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub device_class_id: DeviceClassId,
    pub plugin_id: PluginId,
    pub name: String,

    /// Verified against the class's param types; only replaced through
    /// reconfiguration
    pub params: ParamList,
    pub settings: ParamList,
    pub states: IndexMap<StateTypeId, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<DeviceId>,

    pub setup_state: SetupState,
    /// Status of the last finished setup
    pub setup_status: ThingError,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub setup_message: String,

    /// Created by the plugin rather than by a user request
    #[serde(default)]
    pub auto_created: bool,
}

impl Device {
    /// Create an unconfigured device with states at their defaults
    pub fn new(id: DeviceId, class: &DeviceClass, name: impl Into<String>, params: ParamList) -> Self {
        let states = class
            .state_types
            .iter()
            .map(|s| (s.id, s.default_value.clone()))
            .collect();
        Self {
            id,
            device_class_id: class.id,
            plugin_id: class.plugin_id,
            name: name.into(),
            params,
            settings: ParamList::new(),
            states,
            parent_id: None,
            setup_state: SetupState::Unconfigured,
            setup_status: ThingError::NoError,
            setup_message: String::new(),
            auto_created: false,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<DeviceId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn state_value(&self, state_type_id: &StateTypeId) -> Option<&Value> {
        self.states.get(state_type_id)
    }

    /// Store a state value, returning whether it changed
    pub fn set_state_value(&mut self, state_type_id: StateTypeId, value: Value) -> bool {
        match self.states.insert(state_type_id, value.clone()) {
            Some(old) => old != value,
            None => true,
        }
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_state.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_class::StateType;
    use crate::ids::VendorId;
    use crate::param::ValueType;
    use serde_json::json;

    #[test]
    fn test_new_device_has_default_states() {
        let temp = StateType::new(StateTypeId::generate(), "temperature", ValueType::Double, 0.0);
        let class = DeviceClass::new(
            DeviceClassId::generate(),
            VendorId::generate(),
            PluginId::generate(),
            "thermometer",
        )
        .with_state_types(vec![temp.clone()]);

        let mut device = Device::new(DeviceId::generate(), &class, "Kitchen", ParamList::new());
        assert_eq!(device.setup_state, SetupState::Unconfigured);
        assert_eq!(device.plugin_id, class.plugin_id);
        assert_eq!(device.state_value(&temp.id), Some(&json!(0.0)));

        assert!(device.set_state_value(temp.id, json!(21.5)));
        assert!(!device.set_state_value(temp.id, json!(21.5)));
    }
}
