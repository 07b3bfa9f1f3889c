//! Core types for the hub
//!
//! This crate provides the types shared by every other hub crate: typed
//! identifiers, the `ThingError` status taxonomy, params, device classes,
//! configured devices, the setup state machine and the lifecycle events the
//! device runtime fires on the event bus.

mod action;
mod context;
mod descriptor;
mod device;
mod device_class;
mod error;
mod event;
mod ids;
mod param;
mod setup_state;

pub use action::{Action, BrowserItem, DeviceEvent};
pub use context::Context;
pub use descriptor::DeviceDescriptor;
pub use device::Device;
pub use device_class::{
    ActionType, CreateMethod, DeviceClass, DeviceEventType, SetupMethod, StateType, Vendor,
};
pub use error::{ThingError, ThingResult};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use ids::{
    ActionId, ActionTypeId, BrowserItemId, DeviceClassId, DeviceDescriptorId, DeviceId,
    EventTypeId, IdError, PairingTransactionId, ParamTypeId, PluginId, SetupTransactionId,
    StateTypeId, VendorId,
};
pub use param::{Param, ParamList, ParamType, ValueType};
pub use setup_state::{InvalidTransition, SetupState};

/// Lifecycle events fired by the device runtime
pub mod events {
    use super::*;
    use serde::{Deserialize, Serialize};

    pub const DEVICE_ADDED: &str = "device_added";
    pub const DEVICE_CHANGED: &str = "device_changed";
    pub const DEVICE_REMOVED: &str = "device_removed";
    pub const DEVICE_DISAPPEARED: &str = "device_disappeared";
    pub const DEVICE_SETUP_FINISHED: &str = "device_setup_finished";
    pub const DEVICE_RECONFIGURATION_FINISHED: &str = "device_reconfiguration_finished";
    pub const DEVICE_SETTING_CHANGED: &str = "device_setting_changed";
    pub const DEVICE_STATE_CHANGED: &str = "device_state_changed";
    pub const EVENT_TRIGGERED: &str = "event_triggered";
    pub const DEVICES_DISCOVERED: &str = "devices_discovered";
    pub const PAIRING_FINISHED: &str = "pairing_finished";
    pub const ACTION_EXECUTION_FINISHED: &str = "action_execution_finished";
    pub const PLUGIN_CONFIG_CHANGED: &str = "plugin_config_changed";

    /// Data for DEVICE_ADDED events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceAddedData {
        pub device: Device,
    }

    impl EventData for DeviceAddedData {
        fn event_type() -> &'static str {
            DEVICE_ADDED
        }
    }

    /// Data for DEVICE_CHANGED events (name, settings or params changed)
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceChangedData {
        pub device: Device,
    }

    impl EventData for DeviceChangedData {
        fn event_type() -> &'static str {
            DEVICE_CHANGED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceRemovedData {
        pub device_id: DeviceId,
    }

    impl EventData for DeviceRemovedData {
        fn event_type() -> &'static str {
            DEVICE_REMOVED
        }
    }

    /// Data for DEVICE_DISAPPEARED events, fired when a plugin reports an
    /// auto device gone; a DEVICE_REMOVED follows
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceDisappearedData {
        pub device_id: DeviceId,
    }

    impl EventData for DeviceDisappearedData {
        fn event_type() -> &'static str {
            DEVICE_DISAPPEARED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceSetupFinishedData {
        pub device_id: DeviceId,
        pub status: ThingError,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub message: String,
    }

    impl EventData for DeviceSetupFinishedData {
        fn event_type() -> &'static str {
            DEVICE_SETUP_FINISHED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceReconfigurationFinishedData {
        pub device_id: DeviceId,
        pub status: ThingError,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub message: String,
    }

    impl EventData for DeviceReconfigurationFinishedData {
        fn event_type() -> &'static str {
            DEVICE_RECONFIGURATION_FINISHED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceSettingChangedData {
        pub device_id: DeviceId,
        pub param_type_id: ParamTypeId,
        pub value: serde_json::Value,
    }

    impl EventData for DeviceSettingChangedData {
        fn event_type() -> &'static str {
            DEVICE_SETTING_CHANGED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DeviceStateChangedData {
        pub device_id: DeviceId,
        pub state_type_id: StateTypeId,
        pub value: serde_json::Value,
    }

    impl EventData for DeviceStateChangedData {
        fn event_type() -> &'static str {
            DEVICE_STATE_CHANGED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct EventTriggeredData {
        pub event: DeviceEvent,
    }

    impl EventData for EventTriggeredData {
        fn event_type() -> &'static str {
            EVENT_TRIGGERED
        }
    }

    /// Data for DEVICES_DISCOVERED events; on failure `descriptors` is empty
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DevicesDiscoveredData {
        pub device_class_id: DeviceClassId,
        pub status: ThingError,
        pub descriptors: Vec<DeviceDescriptor>,
    }

    impl EventData for DevicesDiscoveredData {
        fn event_type() -> &'static str {
            DEVICES_DISCOVERED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PairingFinishedData {
        pub transaction_id: PairingTransactionId,
        pub status: ThingError,
        /// The device created by a successful pairing
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub device_id: Option<DeviceId>,
    }

    impl EventData for PairingFinishedData {
        fn event_type() -> &'static str {
            PAIRING_FINISHED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ActionExecutionFinishedData {
        pub action_id: ActionId,
        pub device_id: DeviceId,
        pub status: ThingError,
    }

    impl EventData for ActionExecutionFinishedData {
        fn event_type() -> &'static str {
            ACTION_EXECUTION_FINISHED
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PluginConfigChangedData {
        pub plugin_id: PluginId,
        pub config: ParamList,
    }

    impl EventData for PluginConfigChangedData {
        fn event_type() -> &'static str {
            PLUGIN_CONFIG_CHANGED
        }
    }
}
