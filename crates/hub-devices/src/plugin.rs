//! The capability surface plugins implement

use std::sync::Arc;

use hub_core::{
    BrowserItem, BrowserItemId, Device, DeviceClass, DeviceClassId, DeviceDescriptor,
    DeviceEvent, DeviceId, ParamList, ParamType, PluginId, StateTypeId, ThingError, ThingResult,
    Vendor,
};
use hub_hardware::{HardwareManager, HardwareResource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::transaction::{
    ActionInfo, DiscoveryInfo, MessageSender, PairingInfo, RuntimeMessage, SetupInfo,
};

/// What `DevicePlugin::setup_device` returns right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    Success,
    Failure,
    /// The plugin keeps the `SetupInfo` and finishes it later
    Async,
}

/// Optional capabilities a plugin declares.
///
/// The runtime checks these before dispatching, and answers `Unsupported`
/// itself for anything not declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    pub discovery: bool,
    pub pairing: bool,
    pub browsing: bool,
}

impl PluginCapabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_discovery(mut self) -> Self {
        self.discovery = true;
        self
    }

    pub fn with_pairing(mut self) -> Self {
        self.pairing = true;
        self
    }

    pub fn with_browsing(mut self) -> Self {
        self.browsing = true;
        self
    }
}

/// A code unit implementing the behavior of one or more device classes.
///
/// All methods are called on the runtime's control thread and should return
/// quickly. Long work belongs on the plugin's own threads or tasks, reporting
/// back through the info handles and the [`PluginHandle`].
pub trait DevicePlugin: Send {
    fn id(&self) -> PluginId;

    fn name(&self) -> &str;

    fn vendors(&self) -> Vec<Vendor>;

    fn device_classes(&self) -> Vec<DeviceClass>;

    /// Resources the host must provide before this plugin is loaded
    fn required_hardware(&self) -> Vec<HardwareResource> {
        Vec::new()
    }

    /// Plugin-wide param types, distinct from any device class's params
    fn configuration_description(&self) -> Vec<ParamType> {
        Vec::new()
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::none()
    }

    fn init(&mut self, context: PluginContext) {
        let _ = context;
    }

    /// Bring up a device. `Success`/`Failure` finish the transaction right
    /// away; `Async` leaves it to the plugin.
    fn setup_device(&mut self, info: SetupInfo) -> SetupStatus;

    fn post_setup_device(&mut self, device: &Device) {
        let _ = device;
    }

    /// Release whatever the plugin holds for `device`
    fn device_removed(&mut self, device: &Device) {
        let _ = device;
    }

    fn discover_devices(&mut self, info: DiscoveryInfo) {
        info.finish(ThingError::Unsupported, Vec::new());
    }

    fn start_pairing(&mut self, info: PairingInfo) {
        info.finish(ThingError::Unsupported, "");
    }

    fn confirm_pairing(&mut self, info: PairingInfo, secret: &str) {
        let _ = secret;
        info.finish(ThingError::Unsupported, "");
    }

    fn execute_action(&mut self, info: ActionInfo) {
        info.finish(ThingError::Unsupported);
    }

    fn browse_device(
        &mut self,
        device: &Device,
        browser: &str,
        node: &BrowserItemId,
    ) -> ThingResult<Vec<BrowserItem>> {
        let _ = (device, browser, node);
        Err(ThingError::Unsupported)
    }

    /// Configuration changed; `config` is verified and complete
    fn set_configuration(&mut self, config: &ParamList) {
        let _ = config;
    }

    /// Fire-and-forget notice that a device's settings changed
    fn device_settings_changed(&mut self, device: &Device, changed: &ParamList) {
        let _ = (device, changed);
    }

    fn shutdown(&mut self) {}
}

/// Everything a plugin gets at init
#[derive(Clone)]
pub struct PluginContext {
    pub handle: PluginHandle,
    pub hardware: Arc<HardwareManager>,
    pub config: ParamList,
}

/// Outbound channel from a plugin to the runtime, usable from any thread
#[derive(Debug, Clone)]
pub struct PluginHandle {
    plugin_id: PluginId,
    sender: MessageSender,
}

impl PluginHandle {
    pub(crate) fn new(plugin_id: PluginId, sender: MessageSender) -> Self {
        Self { plugin_id, sender }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin_id
    }

    /// Report a new state value; validated and applied on the control thread
    pub fn set_state_value(
        &self,
        device_id: DeviceId,
        state_type_id: StateTypeId,
        value: impl Into<Value>,
    ) {
        self.send(RuntimeMessage::StateChanged {
            plugin_id: self.plugin_id,
            device_id,
            state_type_id,
            value: value.into(),
        });
    }

    pub fn emit_event(&self, event: DeviceEvent) {
        self.send(RuntimeMessage::EventEmitted {
            plugin_id: self.plugin_id,
            event,
        });
    }

    /// Announce devices the plugin found on its own (class create method `Auto`)
    pub fn auto_devices_appeared(
        &self,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        self.send(RuntimeMessage::AutoDevicesAppeared {
            plugin_id: self.plugin_id,
            device_class_id,
            descriptors,
        });
    }

    pub fn device_disappeared(&self, device_id: DeviceId) {
        self.send(RuntimeMessage::DeviceDisappeared {
            plugin_id: self.plugin_id,
            device_id,
        });
    }

    fn send(&self, message: RuntimeMessage) {
        if self.sender.send(message).is_err() {
            debug!(plugin = %self.plugin_id, "Runtime stopped, dropping plugin message");
        }
    }
}
