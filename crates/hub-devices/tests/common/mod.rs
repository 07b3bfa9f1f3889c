//! Mock plugin and fixtures shared by the runtime tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use hub_core::{
    ActionType, ActionTypeId, BrowserItem, BrowserItemId, CreateMethod, Device, DeviceClass,
    DeviceClassId, DeviceEventType, DeviceId, EventTypeId, ParamList, ParamType, ParamTypeId,
    PluginId, SetupMethod, StateType, StateTypeId, ThingError, ThingResult, ValueType, Vendor,
    VendorId,
};
use hub_devices::{
    ActionInfo, DeviceManager, DevicePlugin, DiscoveryInfo, PairingInfo, PluginCapabilities,
    PluginContext, PluginHandle, SetupInfo, SetupStatus,
};
use hub_event_bus::{EventBus, SharedEventBus};
use hub_hardware::{HardwareManager, HardwareResource};

/// Ids and classes the mock plugin publishes
pub struct Catalog {
    pub plugin_id: PluginId,
    pub vendor: Vendor,

    pub alarm: DeviceClass,
    pub monday: ParamTypeId,
    pub hours: ParamTypeId,
    pub minutes: ParamTypeId,
    pub volume: ParamTypeId,
    pub ringing: StateTypeId,
    pub enabled: StateTypeId,
    pub triggered: EventTypeId,
    pub snooze: ActionTypeId,
    pub snooze_minutes: ParamTypeId,

    /// Discovery-only class
    pub scanner: DeviceClass,
    pub address: ParamTypeId,
    pub timeout: ParamTypeId,

    /// Paired with a PIN
    pub lock: DeviceClass,
    pub lock_address: ParamTypeId,

    /// Paired by pressing a button on the device
    pub button: DeviceClass,

    pub gateway: DeviceClass,
    /// Appears on its own under a gateway
    pub sensor: DeviceClass,
    pub channel: ParamTypeId,
    pub temperature: StateTypeId,

    pub player: DeviceClass,

    pub poll_seconds: ParamTypeId,
}

impl Catalog {
    pub fn new() -> Self {
        let plugin_id = PluginId::generate();
        let vendor = Vendor::new(VendorId::generate(), "mock");
        let class = |name: &str| {
            DeviceClass::new(DeviceClassId::generate(), vendor.id, plugin_id, name)
        };

        let monday = ParamTypeId::generate();
        let hours = ParamTypeId::generate();
        let minutes = ParamTypeId::generate();
        let volume = ParamTypeId::generate();
        let ringing = StateTypeId::generate();
        let enabled = StateTypeId::generate();
        let triggered = EventTypeId::generate();
        let snooze = ActionTypeId::generate();
        let snooze_minutes = ParamTypeId::generate();
        let alarm = class("alarm")
            .with_interfaces(&["alarm", "notifications"])
            .with_param_types(vec![
                ParamType::new(monday, "monday", ValueType::Bool).with_default(false),
                ParamType::new(hours, "hours", ValueType::Int).with_range(0.0, 23.0),
                ParamType::new(minutes, "minutes", ValueType::Int).with_range(0.0, 59.0),
            ])
            .with_settings_types(vec![ParamType::new(volume, "volume", ValueType::Int)
                .with_default(50)
                .with_range(0.0, 100.0)])
            .with_state_types(vec![
                StateType::new(ringing, "ringing", ValueType::Bool, false),
                StateType::new(enabled, "enabled", ValueType::Bool, true).writable(),
            ])
            .with_event_types(vec![DeviceEventType::new(triggered, "triggered")])
            .with_action_types(vec![ActionType::new(snooze, "snooze").with_param_types(vec![
                ParamType::new(snooze_minutes, "minutes", ValueType::Int).with_default(5),
            ])]);

        let address = ParamTypeId::generate();
        let timeout = ParamTypeId::generate();
        let scanner = class("scanner")
            .with_param_types(vec![ParamType::new(address, "address", ValueType::String)])
            .with_discovery_param_types(vec![
                ParamType::new(timeout, "timeout", ValueType::Int).with_default(5)
            ])
            .with_create_methods(&[CreateMethod::Discovery]);

        let lock_address = ParamTypeId::generate();
        let lock = class("lock")
            .with_param_types(vec![ParamType::new(lock_address, "address", ValueType::String)])
            .with_create_methods(&[CreateMethod::User, CreateMethod::Discovery])
            .with_setup_method(SetupMethod::EnterPin);

        let button = class("button")
            .with_param_types(vec![ParamType::new(lock_address, "address", ValueType::String)])
            .with_create_methods(&[CreateMethod::User, CreateMethod::Discovery])
            .with_setup_method(SetupMethod::UserConfirmation);

        let gateway = class("gateway").with_interfaces(&["gateway"]);

        let channel = ParamTypeId::generate();
        let temperature = StateTypeId::generate();
        let sensor = class("sensor")
            .with_interfaces(&["temperaturesensor"])
            .with_param_types(vec![ParamType::new(channel, "channel", ValueType::Int)])
            .with_state_types(vec![StateType::new(
                temperature,
                "temperature",
                ValueType::Double,
                0.0,
            )])
            .with_create_methods(&[CreateMethod::Auto]);

        let player = class("player").with_interfaces(&["media"]).browsable();

        Self {
            plugin_id,
            vendor,
            alarm,
            monday,
            hours,
            minutes,
            volume,
            ringing,
            enabled,
            triggered,
            snooze,
            snooze_minutes,
            scanner,
            address,
            timeout,
            lock,
            lock_address,
            button,
            gateway,
            sensor,
            channel,
            temperature,
            player,
            poll_seconds: ParamTypeId::generate(),
        }
    }

    pub fn classes(&self) -> Vec<DeviceClass> {
        vec![
            self.alarm.clone(),
            self.scanner.clone(),
            self.lock.clone(),
            self.button.clone(),
            self.gateway.clone(),
            self.sensor.clone(),
            self.player.clone(),
        ]
    }

    /// Monday 07:00
    pub fn wake_params(&self) -> ParamList {
        ParamList::new()
            .with(self.monday, true)
            .with(self.hours, 7)
            .with(self.minutes, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupBehavior {
    Succeed,
    Fail,
    /// Keep the transaction for the test to finish
    Async,
}

/// Everything the plugin saw, for assertions
#[derive(Default)]
pub struct Recorded {
    pub handle: Option<PluginHandle>,
    pub config: ParamList,
    pub setups: Vec<SetupInfo>,
    pub post_setup: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
    pub discoveries: Vec<DiscoveryInfo>,
    pub pairings: Vec<PairingInfo>,
    pub confirmations: Vec<(PairingInfo, String)>,
    pub actions: Vec<ActionInfo>,
    pub settings_changed: Vec<(DeviceId, ParamList)>,
    pub shut_down: bool,
}

pub struct Shared {
    pub behavior: Mutex<SetupBehavior>,
    pub recorded: Mutex<Recorded>,
}

impl Shared {
    pub fn set_behavior(&self, behavior: SetupBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn handle(&self) -> PluginHandle {
        self.recorded.lock().unwrap().handle.clone().unwrap()
    }

    pub fn take_setup(&self) -> SetupInfo {
        self.recorded.lock().unwrap().setups.remove(0)
    }

    pub fn take_discovery(&self) -> DiscoveryInfo {
        self.recorded.lock().unwrap().discoveries.remove(0)
    }

    pub fn take_pairing(&self) -> PairingInfo {
        self.recorded.lock().unwrap().pairings.remove(0)
    }

    pub fn removed(&self) -> Vec<DeviceId> {
        self.recorded.lock().unwrap().removed.clone()
    }

    pub fn post_setup(&self) -> Vec<DeviceId> {
        self.recorded.lock().unwrap().post_setup.clone()
    }
}

pub struct MockPlugin {
    catalog: Arc<Catalog>,
    shared: Arc<Shared>,
    capabilities: PluginCapabilities,
    required_hardware: Vec<HardwareResource>,
}

impl MockPlugin {
    pub fn new(catalog: Arc<Catalog>, capabilities: PluginCapabilities) -> (Self, Arc<Shared>) {
        let shared = Arc::new(Shared {
            behavior: Mutex::new(SetupBehavior::Succeed),
            recorded: Mutex::new(Recorded::default()),
        });
        let plugin = Self {
            catalog,
            shared: shared.clone(),
            capabilities,
            required_hardware: vec![HardwareResource::Timers],
        };
        (plugin, shared)
    }

    pub fn requiring(mut self, resources: Vec<HardwareResource>) -> Self {
        self.required_hardware = resources;
        self
    }
}

impl DevicePlugin for MockPlugin {
    fn id(&self) -> PluginId {
        self.catalog.plugin_id
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn vendors(&self) -> Vec<Vendor> {
        vec![self.catalog.vendor.clone()]
    }

    fn device_classes(&self) -> Vec<DeviceClass> {
        self.catalog.classes()
    }

    fn required_hardware(&self) -> Vec<HardwareResource> {
        self.required_hardware.clone()
    }

    fn configuration_description(&self) -> Vec<ParamType> {
        vec![ParamType::new(self.catalog.poll_seconds, "poll seconds", ValueType::Int)
            .with_default(60)
            .with_range(1.0, 3600.0)]
    }

    fn capabilities(&self) -> PluginCapabilities {
        self.capabilities
    }

    fn init(&mut self, context: PluginContext) {
        let mut recorded = self.shared.recorded.lock().unwrap();
        recorded.handle = Some(context.handle);
        recorded.config = context.config;
    }

    fn setup_device(&mut self, info: SetupInfo) -> SetupStatus {
        match *self.shared.behavior.lock().unwrap() {
            SetupBehavior::Succeed => SetupStatus::Success,
            SetupBehavior::Fail => SetupStatus::Failure,
            SetupBehavior::Async => {
                self.shared.recorded.lock().unwrap().setups.push(info);
                SetupStatus::Async
            }
        }
    }

    fn post_setup_device(&mut self, device: &Device) {
        self.shared.recorded.lock().unwrap().post_setup.push(device.id);
    }

    fn device_removed(&mut self, device: &Device) {
        self.shared.recorded.lock().unwrap().removed.push(device.id);
    }

    fn discover_devices(&mut self, info: DiscoveryInfo) {
        self.shared.recorded.lock().unwrap().discoveries.push(info);
    }

    fn start_pairing(&mut self, info: PairingInfo) {
        self.shared.recorded.lock().unwrap().pairings.push(info);
    }

    fn confirm_pairing(&mut self, info: PairingInfo, secret: &str) {
        if secret == "1234" || secret.is_empty() {
            info.finish(ThingError::NoError, "");
        } else {
            info.finish(ThingError::AuthenticationFailure, "wrong pin");
        }
        self.shared
            .recorded
            .lock()
            .unwrap()
            .confirmations
            .push((info, secret.to_string()));
    }

    fn execute_action(&mut self, info: ActionInfo) {
        info.finish(ThingError::NoError);
        self.shared.recorded.lock().unwrap().actions.push(info);
    }

    fn browse_device(
        &mut self,
        _device: &Device,
        _browser: &str,
        node: &BrowserItemId,
    ) -> ThingResult<Vec<BrowserItem>> {
        match node.as_str() {
            "" => Ok(vec![BrowserItem::new("music", "Music").browsable()]),
            "music" => Ok(vec![BrowserItem::new("music/song", "Song").executable()]),
            _ => Err(ThingError::ItemNotFound),
        }
    }

    fn set_configuration(&mut self, config: &ParamList) {
        self.shared.recorded.lock().unwrap().config = config.clone();
    }

    fn device_settings_changed(&mut self, device: &Device, changed: &ParamList) {
        self.shared
            .recorded
            .lock()
            .unwrap()
            .settings_changed
            .push((device.id, changed.clone()));
    }

    fn shutdown(&mut self) {
        self.shared.recorded.lock().unwrap().shut_down = true;
    }
}

pub struct Harness {
    pub bus: SharedEventBus,
    pub manager: DeviceManager,
    pub catalog: Arc<Catalog>,
    pub plugin: Arc<Shared>,
}

pub fn harness(capabilities: PluginCapabilities) -> Harness {
    let bus = Arc::new(EventBus::new());
    let hardware = Arc::new(HardwareManager::new().with_network(true).with_timers(true));
    let mut manager = DeviceManager::new(bus.clone(), hardware);
    let catalog = Arc::new(Catalog::new());
    let (plugin, shared) = MockPlugin::new(catalog.clone(), capabilities);
    manager.register_plugin(Box::new(plugin)).unwrap();
    Harness {
        bus,
        manager,
        catalog,
        plugin: shared,
    }
}

pub fn all_capabilities() -> PluginCapabilities {
    PluginCapabilities::none()
        .with_discovery()
        .with_pairing()
        .with_browsing()
}
