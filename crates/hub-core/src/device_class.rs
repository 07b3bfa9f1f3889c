//! Device classes and vendors
//!
//! A [`DeviceClass`] is the immutable template a plugin publishes for one
//! kind of device: which params it needs, which states it reports, which
//! actions it accepts and how instances are created and set up.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ActionTypeId, DeviceClassId, EventTypeId, PluginId, StateTypeId, VendorId};
use crate::param::{ParamType, ValueType};

/// A device manufacturer or integration provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    pub display_name: String,
}

impl Vendor {
    pub fn new(id: VendorId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: name.clone(),
            name,
        }
    }
}

/// How a device of a class may come into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMethod {
    /// Params entered by the user
    User,
    /// Picked from a discovery result
    Discovery,
    /// Created by the plugin on its own
    Auto,
}

/// What the user has to do to complete setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupMethod {
    #[default]
    JustAdd,
    /// User confirms out-of-band (e.g. pressing a button on the device)
    UserConfirmation,
    /// The device shows a PIN the user enters back
    DisplayPin,
    /// The user enters a known secret
    EnterPin,
}

impl SetupMethod {
    /// Whether pairing needs a secret from the user at confirmation time
    pub fn requires_secret(&self) -> bool {
        matches!(self, SetupMethod::DisplayPin | SetupMethod::EnterPin)
    }
}

/// A state a device reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateType {
    pub id: StateTypeId,
    pub name: String,
    pub value_type: ValueType,
    pub default_value: Value,
    /// Writable states get an action type with the same id
    #[serde(default)]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
}

impl StateType {
    pub fn new(
        id: StateTypeId,
        name: impl Into<String>,
        value_type: ValueType,
        default_value: impl Into<Value>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            value_type,
            default_value: default_value.into(),
            writable: false,
            allowed_values: Vec::new(),
        }
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Check a reported value against this state's type
    pub fn accepts(&self, value: &Value) -> bool {
        self.value_type.accepts(value)
            && (self.allowed_values.is_empty() || self.allowed_values.contains(value))
    }
}

/// An action a device accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionType {
    pub id: ActionTypeId,
    pub name: String,
    #[serde(default)]
    pub param_types: Vec<ParamType>,
}

impl ActionType {
    pub fn new(id: ActionTypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            param_types: Vec::new(),
        }
    }

    pub fn with_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.param_types = param_types;
        self
    }
}

/// An event a device may trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEventType {
    pub id: EventTypeId,
    pub name: String,
    #[serde(default)]
    pub param_types: Vec<ParamType>,
}

impl DeviceEventType {
    pub fn new(id: EventTypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            param_types: Vec::new(),
        }
    }
}

/// Template for one kind of device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceClass {
    pub id: DeviceClassId,
    pub vendor_id: VendorId,
    pub plugin_id: PluginId,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub param_types: Vec<ParamType>,
    #[serde(default)]
    pub settings_types: Vec<ParamType>,
    #[serde(default)]
    pub discovery_param_types: Vec<ParamType>,
    #[serde(default)]
    pub state_types: Vec<StateType>,
    #[serde(default)]
    pub event_types: Vec<DeviceEventType>,
    #[serde(default)]
    pub action_types: Vec<ActionType>,
    pub create_methods: Vec<CreateMethod>,
    #[serde(default)]
    pub setup_method: SetupMethod,
    #[serde(default)]
    pub browsable: bool,
}

impl DeviceClass {
    pub fn new(
        id: DeviceClassId,
        vendor_id: VendorId,
        plugin_id: PluginId,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            vendor_id,
            plugin_id,
            display_name: name.clone(),
            name,
            interfaces: Vec::new(),
            param_types: Vec::new(),
            settings_types: Vec::new(),
            discovery_param_types: Vec::new(),
            state_types: Vec::new(),
            event_types: Vec::new(),
            action_types: Vec::new(),
            create_methods: vec![CreateMethod::User],
            setup_method: SetupMethod::JustAdd,
            browsable: false,
        }
    }

    pub fn with_interfaces(mut self, interfaces: &[&str]) -> Self {
        self.interfaces = interfaces.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.param_types = param_types;
        self
    }

    pub fn with_settings_types(mut self, settings_types: Vec<ParamType>) -> Self {
        self.settings_types = settings_types;
        self
    }

    pub fn with_discovery_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.discovery_param_types = param_types;
        self
    }

    pub fn with_state_types(mut self, state_types: Vec<StateType>) -> Self {
        self.state_types = state_types;
        self
    }

    pub fn with_event_types(mut self, event_types: Vec<DeviceEventType>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_action_types(mut self, action_types: Vec<ActionType>) -> Self {
        self.action_types = action_types;
        self
    }

    pub fn with_create_methods(mut self, create_methods: &[CreateMethod]) -> Self {
        self.create_methods = create_methods.to_vec();
        self
    }

    pub fn with_setup_method(mut self, setup_method: SetupMethod) -> Self {
        self.setup_method = setup_method;
        self
    }

    pub fn browsable(mut self) -> Self {
        self.browsable = true;
        self
    }

    pub fn supports(&self, method: CreateMethod) -> bool {
        self.create_methods.contains(&method)
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    pub fn state_type(&self, id: &StateTypeId) -> Option<&StateType> {
        self.state_types.iter().find(|s| &s.id == id)
    }

    pub fn event_type(&self, id: &EventTypeId) -> Option<&DeviceEventType> {
        self.event_types.iter().find(|e| &e.id == id)
    }

    /// All action types, including the ones generated for writable states.
    ///
    /// A writable state `s` yields an action type with the same uuid as `s`
    /// and a single param of the state's type, also sharing that uuid.
    pub fn action_types(&self) -> Vec<ActionType> {
        let mut action_types = self.action_types.clone();
        for state_type in self.state_types.iter().filter(|s| s.writable) {
            let id = ActionTypeId::from_uuid(*state_type.id.as_uuid());
            if action_types.iter().any(|a| a.id == id) {
                continue;
            }
            let param = ParamType::new(
                crate::ids::ParamTypeId::from_uuid(*state_type.id.as_uuid()),
                state_type.name.clone(),
                state_type.value_type,
            )
            .with_allowed_values(state_type.allowed_values.clone());
            action_types.push(
                ActionType::new(id, format!("set {}", state_type.name))
                    .with_param_types(vec![param]),
            );
        }
        action_types
    }

    pub fn action_type(&self, id: &ActionTypeId) -> Option<ActionType> {
        self.action_types().into_iter().find(|a| &a.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lamp() -> DeviceClass {
        DeviceClass::new(
            DeviceClassId::generate(),
            VendorId::generate(),
            PluginId::generate(),
            "lamp",
        )
        .with_interfaces(&["light", "power"])
        .with_state_types(vec![
            StateType::new(StateTypeId::generate(), "power", ValueType::Bool, false).writable(),
            StateType::new(StateTypeId::generate(), "reachable", ValueType::Bool, true),
        ])
    }

    #[test]
    fn test_writable_state_generates_action() {
        let class = lamp();
        let power = &class.state_types[0];
        let actions = class.action_types();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].id.as_uuid(), power.id.as_uuid());
        assert_eq!(actions[0].param_types[0].value_type, ValueType::Bool);
        assert!(class
            .action_type(&ActionTypeId::from_uuid(*power.id.as_uuid()))
            .is_some());
    }

    #[test]
    fn test_explicit_action_is_not_duplicated() {
        let mut class = lamp();
        let power_id = class.state_types[0].id;
        class.action_types = vec![ActionType::new(
            ActionTypeId::from_uuid(*power_id.as_uuid()),
            "custom power",
        )];
        let actions = class.action_types();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "custom power");
    }

    #[test]
    fn test_interfaces_and_methods() {
        let class = lamp().with_create_methods(&[CreateMethod::Discovery]);
        assert!(class.implements("light"));
        assert!(!class.implements("sensor"));
        assert!(class.supports(CreateMethod::Discovery));
        assert!(!class.supports(CreateMethod::User));
    }

    #[test]
    fn test_state_accepts() {
        let state = StateType::new(StateTypeId::generate(), "mode", ValueType::String, "auto");
        assert!(state.accepts(&json!("eco")));
        assert!(!state.accepts(&json!(3)));
    }

    #[test]
    fn test_setup_method_secret() {
        assert!(SetupMethod::DisplayPin.requires_secret());
        assert!(SetupMethod::EnterPin.requires_secret());
        assert!(!SetupMethod::UserConfirmation.requires_secret());
        assert!(!SetupMethod::JustAdd.requires_secret());
    }
}
