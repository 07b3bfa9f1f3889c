//! Device Integration Runtime
//!
//! [`DeviceManager`] owns the catalog, the plugins, the configured devices
//! and every open transaction. It is not `Sync`: one control thread owns it
//! (see [`crate::DeviceRuntime`]) and applies queued plugin completions in
//! arrival order through [`DeviceManager::process_pending`] or
//! [`DeviceManager::next_message`].
//!
//! Device-mutating calls return `Ok` when the request was accepted. The
//! outcome of setup, pairing, discovery and actions arrives later as an
//! event on the bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use hub_core::events::{
    ActionExecutionFinishedData, DeviceAddedData, DeviceChangedData, DeviceDisappearedData,
    DeviceReconfigurationFinishedData, DeviceRemovedData, DeviceSettingChangedData,
    DeviceSetupFinishedData, DeviceStateChangedData, DevicesDiscoveredData, EventTriggeredData,
    PairingFinishedData, PluginConfigChangedData,
};
use hub_core::{
    Action, ActionId, BrowserItem, BrowserItemId, Context, CreateMethod, Device, DeviceClass,
    DeviceClassId, DeviceDescriptor, DeviceDescriptorId, DeviceEvent, DeviceId, EventOrigin,
    PairingTransactionId, ParamList, ParamType, PluginId, SetupMethod, SetupState,
    SetupTransactionId, StateTypeId, ThingError, ThingResult, Vendor, VendorId,
};
use hub_event_bus::SharedEventBus;
use hub_hardware::{HardwareManager, HardwareResource};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::catalog::DeviceClassCatalog;
use crate::plugin::{DevicePlugin, PluginCapabilities, PluginContext, PluginHandle, SetupStatus};
use crate::transaction::{
    ActionInfo, DiscoveryInfo, MessageSender, PairingInfo, PairingPhase, RuntimeMessage,
    SetupInfo,
};

/// Where the params of a new or reconfigured device come from
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// Entered directly (create method `User`)
    Params(ParamList),
    /// Picked from the latest discovery run (create method `Discovery`),
    /// with optional overrides on top of the descriptor's params
    Descriptor {
        descriptor_id: DeviceDescriptorId,
        params: ParamList,
    },
}

impl ParamSource {
    pub fn descriptor(descriptor_id: DeviceDescriptorId) -> Self {
        ParamSource::Descriptor {
            descriptor_id,
            params: ParamList::new(),
        }
    }

    fn create_method(&self) -> CreateMethod {
        match self {
            ParamSource::Params(_) => CreateMethod::User,
            ParamSource::Descriptor { .. } => CreateMethod::Discovery,
        }
    }
}

impl From<ParamList> for ParamSource {
    fn from(params: ParamList) -> Self {
        ParamSource::Params(params)
    }
}

impl From<DeviceDescriptorId> for ParamSource {
    fn from(descriptor_id: DeviceDescriptorId) -> Self {
        ParamSource::descriptor(descriptor_id)
    }
}

/// Where a pairing transaction stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStep {
    /// Waiting for the plugin to finish `start_pairing`
    Started,
    /// Waiting for `confirm_pairing`
    AwaitingConfirmation,
    /// Waiting for the plugin to finish `confirm_pairing`
    Confirming,
    /// Confirmed; the device is being set up and `pairing_finished` fires
    /// with the setup outcome
    SettingUp,
}

/// Summary of a registered plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub capabilities: PluginCapabilities,
    pub required_hardware: Vec<HardwareResource>,
}

struct PluginEntry {
    plugin: Box<dyn DevicePlugin>,
    name: String,
    capabilities: PluginCapabilities,
    required_hardware: Vec<HardwareResource>,
    config_types: Vec<ParamType>,
    config: ParamList,
}

enum SetupKind {
    Add,
    Reconfigure { previous_params: ParamList },
}

struct PendingSetup {
    transaction_id: SetupTransactionId,
    info: SetupInfo,
    kind: SetupKind,
    pairing: Option<PairingTransactionId>,
}

struct DiscoveryRun {
    run: u64,
    descriptors: IndexMap<DeviceDescriptorId, DeviceDescriptor>,
}

struct PendingPairing {
    step: PairingStep,
    /// Attempt of the last [`PairingInfo`] handed to the plugin
    attempt: u64,
    device_class_id: DeviceClassId,
    device_id: DeviceId,
    name: String,
    params: ParamList,
    parent_id: Option<DeviceId>,
    /// Pairing an already configured device reconfigures it
    reconfigure: bool,
}

/// The device integration runtime state
pub struct DeviceManager {
    event_bus: SharedEventBus,
    hardware: Arc<HardwareManager>,
    catalog: DeviceClassCatalog,
    plugins: IndexMap<PluginId, PluginEntry>,
    devices: IndexMap<DeviceId, Device>,
    setups: HashMap<DeviceId, PendingSetup>,
    discoveries: HashMap<DeviceClassId, DiscoveryRun>,
    pairings: HashMap<PairingTransactionId, PendingPairing>,
    /// Every pairing id ever accepted; ids are never reused
    used_pairing_ids: HashSet<PairingTransactionId>,
    next_run: u64,
    next_attempt: u64,
    sender: MessageSender,
    receiver: mpsc::UnboundedReceiver<RuntimeMessage>,
}

impl DeviceManager {
    pub fn new(event_bus: SharedEventBus, hardware: Arc<HardwareManager>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            event_bus,
            hardware,
            catalog: DeviceClassCatalog::new(),
            plugins: IndexMap::new(),
            devices: IndexMap::new(),
            setups: HashMap::new(),
            discoveries: HashMap::new(),
            pairings: HashMap::new(),
            used_pairing_ids: HashSet::new(),
            next_run: 0,
            next_attempt: 0,
            sender,
            receiver,
        }
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn hardware(&self) -> &Arc<HardwareManager> {
        &self.hardware
    }

    // ==================== Plugins ====================

    /// Load a plugin and its device classes.
    ///
    /// The plugin's required hardware must be available. Configuration
    /// starts at the defaults of its configuration description.
    #[instrument(skip_all, fields(plugin = %plugin.name()))]
    pub fn register_plugin(&mut self, mut plugin: Box<dyn DevicePlugin>) -> ThingResult<PluginId> {
        let id = plugin.id();
        if self.plugins.contains_key(&id) {
            warn!(%id, "Plugin already registered");
            return Err(ThingError::DuplicateUuid);
        }

        let required_hardware = plugin.required_hardware();
        if let Some(missing) = self.hardware.missing(&required_hardware) {
            warn!(%missing, "Plugin requires unavailable hardware");
            return Err(ThingError::HardwareNotAvailable);
        }

        let classes = plugin.device_classes();
        let class_count = classes.len();
        self.catalog.add_plugin(id, plugin.vendors(), classes)?;

        let config_types = plugin.configuration_description();
        let config = ParamList::new().verified(&config_types).unwrap_or_else(|e| {
            warn!(error = %e, "Plugin configuration has no usable defaults");
            ParamList::new()
        });

        plugin.init(PluginContext {
            handle: PluginHandle::new(id, self.sender.clone()),
            hardware: self.hardware.clone(),
            config: config.clone(),
        });

        let name = plugin.name().to_string();
        info!(%id, classes = class_count, "Plugin registered");
        self.plugins.insert(
            id,
            PluginEntry {
                capabilities: plugin.capabilities(),
                plugin,
                name,
                required_hardware,
                config_types,
                config,
            },
        );
        Ok(id)
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|(id, entry)| PluginInfo {
                id: *id,
                name: entry.name.clone(),
                capabilities: entry.capabilities,
                required_hardware: entry.required_hardware.clone(),
            })
            .collect()
    }

    pub fn find_plugin_by_name(&self, name: &str) -> Option<PluginId> {
        self.plugins
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    pub fn plugin_config(&self, plugin_id: &PluginId) -> ThingResult<ParamList> {
        self.plugins
            .get(plugin_id)
            .map(|entry| entry.config.clone())
            .ok_or(ThingError::PluginNotFound)
    }

    pub fn plugin_configuration_description(
        &self,
        plugin_id: &PluginId,
    ) -> ThingResult<Vec<ParamType>> {
        self.plugins
            .get(plugin_id)
            .map(|entry| entry.config_types.clone())
            .ok_or(ThingError::PluginNotFound)
    }

    /// Replace a plugin's configuration; omitted values take their defaults
    #[instrument(skip(self, config))]
    pub fn set_plugin_config(&mut self, plugin_id: PluginId, config: ParamList) -> ThingResult<()> {
        let entry = self
            .plugins
            .get_mut(&plugin_id)
            .ok_or(ThingError::PluginNotFound)?;
        let config = config.verified(&entry.config_types)?;
        if config == entry.config {
            return Ok(());
        }

        entry.config = config.clone();
        entry.plugin.set_configuration(&config);
        debug!(plugin = %entry.name, "Plugin configuration changed");
        self.event_bus.fire_typed(
            PluginConfigChangedData { plugin_id, config },
            Context::new(),
        );
        Ok(())
    }

    // ==================== Catalog ====================

    pub fn supported_vendors(&self) -> Vec<Vendor> {
        self.catalog.vendors().cloned().collect()
    }

    pub fn supported_interfaces(&self) -> Vec<String> {
        self.catalog.interfaces()
    }

    /// Device classes, optionally only those of one vendor
    pub fn supported_devices(&self, vendor_id: Option<&VendorId>) -> Vec<DeviceClass> {
        match vendor_id {
            Some(vendor_id) => self.catalog.classes_by_vendor(vendor_id).cloned().collect(),
            None => self.catalog.classes().cloned().collect(),
        }
    }

    pub fn find_device_class(&self, id: &DeviceClassId) -> Option<&DeviceClass> {
        self.catalog.find_class(id)
    }

    // ==================== Devices ====================

    pub fn configured_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn find_configured_device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn find_configured_devices(&self, device_class_id: &DeviceClassId) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| &d.device_class_id == device_class_id)
            .collect()
    }

    pub fn find_configured_devices_by_interface(&self, interface: &str) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| {
                self.catalog
                    .find_class(&d.device_class_id)
                    .is_some_and(|c| c.implements(interface))
            })
            .collect()
    }

    /// Direct children of a device
    pub fn find_child_devices(&self, parent_id: &DeviceId) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| d.parent_id.as_ref() == Some(parent_id))
            .collect()
    }

    /// Create a device and start its setup.
    ///
    /// Returns the id of the accepted device; the setup outcome follows as a
    /// `device_setup_finished` event. A plugin answering synchronously
    /// finishes the setup before this returns.
    #[instrument(skip(self, name, source), fields(class = %device_class_id))]
    pub fn add_configured_device(
        &mut self,
        device_class_id: DeviceClassId,
        name: impl Into<String>,
        source: ParamSource,
        device_id: Option<DeviceId>,
    ) -> ThingResult<DeviceId> {
        let class = self.class_with_plugin(&device_class_id)?;
        if !class.supports(source.create_method()) {
            return Err(ThingError::CreationMethodNotSupported);
        }
        let (params, descriptor) = self.resolve_params(&class, &ParamList::new(), &source)?;
        if class.setup_method != SetupMethod::JustAdd {
            return Err(ThingError::SetupMethodNotSupported);
        }
        let params = params.verified(&class.param_types)?;

        let id = device_id
            .or_else(|| descriptor.as_ref().and_then(|d| d.device_id))
            .unwrap_or_else(DeviceId::generate);
        if self.devices.contains_key(&id) {
            return Err(ThingError::DuplicateUuid);
        }
        let parent_id = descriptor.as_ref().and_then(|d| d.parent_id);
        if let Some(descriptor) = &descriptor {
            self.consume_descriptor(&class.id, &descriptor.id);
        }

        self.create_device(&class, id, name.into(), params, parent_id, false, None)?;
        Ok(id)
    }

    /// Re-run setup for an existing device with new params.
    ///
    /// Params not given keep their current value. State values are kept.
    #[instrument(skip(self, source))]
    pub fn reconfigure_device(&mut self, device_id: DeviceId, source: ParamSource) -> ThingResult<()> {
        let device = self
            .devices
            .get(&device_id)
            .ok_or(ThingError::DeviceNotFound)?;
        let class = self.class_with_plugin(&device.device_class_id)?;
        let (params, descriptor) = self.resolve_params(&class, &device.params, &source)?;
        if let Some(descriptor) = &descriptor {
            if descriptor.device_id.is_some_and(|target| target != device_id) {
                return Err(ThingError::InvalidParameter);
            }
        }
        let params = params.verified(&class.param_types)?;
        if let Some(descriptor) = &descriptor {
            self.consume_descriptor(&class.id, &descriptor.id);
        }

        self.start_reconfigure(device_id, params, None)
    }

    pub fn edit_device(&mut self, device_id: DeviceId, name: impl Into<String>) -> ThingResult<()> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(ThingError::DeviceNotFound)?;
        device.name = name.into();
        let device = device.clone();
        self.event_bus
            .fire_typed(DeviceChangedData { device }, Context::new());
        Ok(())
    }

    /// Update settings; values not given keep their current value
    #[instrument(skip(self, settings))]
    pub fn set_device_settings(&mut self, device_id: DeviceId, settings: ParamList) -> ThingResult<()> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(ThingError::DeviceNotFound)?;
        let class = self
            .catalog
            .find_class(&device.device_class_id)
            .ok_or(ThingError::ClassNotFound)?;
        let merged = device.settings.merged(&settings).verified(&class.settings_types)?;

        let changed: ParamList = merged
            .iter()
            .filter(|p| device.settings.get(&p.param_type_id) != Some(&p.value))
            .cloned()
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        device.settings = merged;
        let device = device.clone();

        for param in &changed {
            self.event_bus.fire_typed(
                DeviceSettingChangedData {
                    device_id,
                    param_type_id: param.param_type_id,
                    value: param.value.clone(),
                },
                Context::new(),
            );
        }
        if let Some(entry) = self.plugins.get_mut(&device.plugin_id) {
            entry.plugin.device_settings_changed(&device, &changed);
        }
        self.event_bus
            .fire_typed(DeviceChangedData { device }, Context::new());
        Ok(())
    }

    /// Remove a device and, before it, all of its descendants.
    ///
    /// A pending setup of any removed device is discarded; its late
    /// completion is ignored.
    #[instrument(skip(self))]
    pub fn remove_configured_device(&mut self, device_id: DeviceId) -> ThingResult<()> {
        if !self.devices.contains_key(&device_id) {
            return Err(ThingError::DeviceNotFound);
        }
        let mut order = Vec::new();
        self.collect_subtree(device_id, &mut order);
        for id in order {
            self.remove_one(id);
        }
        Ok(())
    }

    /// Browse a device's item tree; `None` browses the root
    pub fn browse_device(
        &mut self,
        device_id: DeviceId,
        browser: &str,
        node: Option<&BrowserItemId>,
    ) -> ThingResult<Vec<BrowserItem>> {
        let device = self
            .devices
            .get(&device_id)
            .ok_or(ThingError::DeviceNotFound)?;
        let class = self
            .catalog
            .find_class(&device.device_class_id)
            .ok_or(ThingError::ClassNotFound)?;
        let entry = self
            .plugins
            .get_mut(&device.plugin_id)
            .ok_or(ThingError::PluginNotFound)?;
        if !class.browsable || !entry.capabilities.browsing {
            return Err(ThingError::Unsupported);
        }
        let root = BrowserItemId::default();
        entry
            .plugin
            .browse_device(device, browser, node.unwrap_or(&root))
    }

    // ==================== Discovery ====================

    /// Start a discovery run for a class, superseding any earlier run
    #[instrument(skip(self, params))]
    pub fn discover_devices(
        &mut self,
        device_class_id: DeviceClassId,
        params: ParamList,
    ) -> ThingResult<()> {
        let class = self.class_with_plugin(&device_class_id)?;
        let entry = self
            .plugins
            .get_mut(&class.plugin_id)
            .ok_or(ThingError::PluginNotFound)?;
        if self.hardware.missing(&entry.required_hardware).is_some() {
            return Err(ThingError::HardwareNotAvailable);
        }
        if !class.supports(CreateMethod::Discovery) {
            return Err(ThingError::CreationMethodNotSupported);
        }
        if !entry.capabilities.discovery {
            return Err(ThingError::Unsupported);
        }
        let params = params.verified(&class.discovery_param_types)?;

        self.next_run += 1;
        let run = self.next_run;
        self.discoveries.insert(
            device_class_id,
            DiscoveryRun {
                run,
                descriptors: IndexMap::new(),
            },
        );
        debug!(run, "Starting discovery");
        entry
            .plugin
            .discover_devices(DiscoveryInfo::new(device_class_id, run, params, self.sender.clone()));
        Ok(())
    }

    /// Candidates of the latest finished discovery run for a class
    pub fn discovered_devices(&self, device_class_id: &DeviceClassId) -> Vec<DeviceDescriptor> {
        self.discoveries
            .get(device_class_id)
            .map(|run| run.descriptors.values().cloned().collect())
            .unwrap_or_default()
    }

    // ==================== Pairing ====================

    /// Begin an interactive pairing for a class whose setup method needs
    /// user involvement
    #[instrument(skip(self, name, source), fields(class = %device_class_id))]
    pub fn pair_device(
        &mut self,
        transaction_id: PairingTransactionId,
        device_class_id: DeviceClassId,
        name: impl Into<String>,
        source: ParamSource,
    ) -> ThingResult<()> {
        if self.used_pairing_ids.contains(&transaction_id) {
            warn!(%transaction_id, "Pairing transaction id already used");
            return Err(ThingError::DuplicateUuid);
        }
        let class = self.class_with_plugin(&device_class_id)?;
        let capabilities = self
            .plugins
            .get(&class.plugin_id)
            .map(|entry| entry.capabilities)
            .ok_or(ThingError::PluginNotFound)?;
        if !class.supports(source.create_method()) {
            return Err(ThingError::CreationMethodNotSupported);
        }
        if class.setup_method == SetupMethod::JustAdd {
            return Err(ThingError::SetupMethodNotSupported);
        }
        if class.setup_method == SetupMethod::DisplayPin && !capabilities.pairing {
            return Err(ThingError::Unsupported);
        }

        let (params, descriptor) = self.resolve_params(&class, &ParamList::new(), &source)?;
        let target = descriptor.as_ref().and_then(|d| d.device_id);
        if let Some(target) = target {
            if !self.devices.contains_key(&target) {
                return Err(ThingError::DeviceNotFound);
            }
        }
        let params = params.verified(&class.param_types)?;
        if let Some(descriptor) = &descriptor {
            self.consume_descriptor(&class.id, &descriptor.id);
        }

        let pairing = PendingPairing {
            step: if capabilities.pairing {
                PairingStep::Started
            } else {
                PairingStep::AwaitingConfirmation
            },
            attempt: 0,
            device_class_id,
            device_id: target.unwrap_or_else(DeviceId::generate),
            name: name.into(),
            params,
            parent_id: descriptor.as_ref().and_then(|d| d.parent_id),
            reconfigure: target.is_some(),
        };
        self.used_pairing_ids.insert(transaction_id);
        self.pairings.insert(transaction_id, pairing);

        if capabilities.pairing {
            let info = self.pairing_info(transaction_id, PairingPhase::Start);
            if let (Some(info), Some(entry)) = (info, self.plugins.get_mut(&class.plugin_id)) {
                entry.plugin.start_pairing(info);
            }
        }
        Ok(())
    }

    /// Complete a pairing, creating (or reconfiguring) the device.
    ///
    /// `pairing_finished` fires once the device setup finished or the
    /// plugin rejected the confirmation.
    #[instrument(skip(self, secret))]
    pub fn confirm_pairing(
        &mut self,
        transaction_id: PairingTransactionId,
        secret: Option<&str>,
    ) -> ThingResult<()> {
        let pairing = self
            .pairings
            .get(&transaction_id)
            .ok_or(ThingError::PairingTransactionNotFound)?;
        if pairing.step != PairingStep::AwaitingConfirmation {
            return Err(ThingError::DeviceInUse);
        }
        let class = self.class_with_plugin(&pairing.device_class_id)?;
        let secret = secret.unwrap_or_default();
        if class.setup_method.requires_secret() && secret.is_empty() {
            return Err(ThingError::MissingParameter);
        }

        let capabilities = self
            .plugins
            .get(&class.plugin_id)
            .map(|entry| entry.capabilities)
            .unwrap_or_default();
        if !capabilities.pairing {
            self.complete_pairing(transaction_id);
            return Ok(());
        }

        let info = self
            .pairing_info(transaction_id, PairingPhase::Confirm)
            .ok_or(ThingError::PairingTransactionNotFound)?;
        if let Some(pairing) = self.pairings.get_mut(&transaction_id) {
            pairing.step = PairingStep::Confirming;
        }
        if let Some(entry) = self.plugins.get_mut(&class.plugin_id) {
            entry.plugin.confirm_pairing(info, secret);
        }
        Ok(())
    }

    pub fn pairing_step(&self, transaction_id: &PairingTransactionId) -> Option<PairingStep> {
        self.pairings.get(transaction_id).map(|p| p.step)
    }

    // ==================== Actions ====================

    /// Hand an action to the device's plugin; the result follows as an
    /// `action_execution_finished` event
    #[instrument(skip(self, action), fields(device = %action.device_id, action_type = %action.action_type_id))]
    pub fn execute_action(&mut self, mut action: Action) -> ThingResult<ActionId> {
        let device = self
            .devices
            .get(&action.device_id)
            .ok_or(ThingError::DeviceNotFound)?;
        if !device.is_setup_complete() {
            return Err(ThingError::SetupFailed);
        }
        let class = self
            .catalog
            .find_class(&device.device_class_id)
            .ok_or(ThingError::ClassNotFound)?;
        let action_type = class
            .action_type(&action.action_type_id)
            .ok_or(ThingError::ActionTypeNotFound)?;
        action.params = action.params.verified(&action_type.param_types)?;

        let entry = self
            .plugins
            .get_mut(&device.plugin_id)
            .ok_or(ThingError::PluginNotFound)?;
        let action_id = action.id;
        entry
            .plugin
            .execute_action(ActionInfo::new(action, device.clone(), self.sender.clone()));
        Ok(action_id)
    }

    // ==================== Transactions ====================

    /// Open setup transactions with their age, oldest first
    pub fn pending_setups(&self) -> Vec<(DeviceId, Duration)> {
        let mut pending: Vec<_> = self
            .setups
            .iter()
            .map(|(id, setup)| (*id, setup.info.elapsed()))
            .collect();
        pending.sort_by(|a, b| b.1.cmp(&a.1));
        pending
    }

    /// Apply every queued plugin message. Returns how many were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.handle_message(message);
            processed += 1;
        }
        processed
    }

    /// Wait for the next queued plugin message.
    ///
    /// Cancel-safe. Never resolves to `None` while the manager is alive,
    /// because it keeps a sender of its own.
    pub async fn next_message(&mut self) -> Option<RuntimeMessage> {
        self.receiver.recv().await
    }

    /// Deliver bus readings to their devices' `data_read`
    pub fn dispatch_bus_readings(&self) -> usize {
        self.hardware.dispatch_bus_readings()
    }

    pub fn handle_message(&mut self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::SetupFinished {
                transaction_id,
                device_id,
                status,
                message,
            } => self.on_setup_finished(transaction_id, device_id, status, message),
            RuntimeMessage::PairingFinished {
                transaction_id,
                phase,
                attempt,
                status,
                message,
            } => self.on_pairing_finished(transaction_id, phase, attempt, status, message),
            RuntimeMessage::DiscoveryFinished {
                device_class_id,
                run,
                status,
                descriptors,
            } => self.on_discovery_finished(device_class_id, run, status, descriptors),
            RuntimeMessage::ActionFinished {
                action_id,
                device_id,
                status,
            } => self.event_bus.fire_typed(
                ActionExecutionFinishedData {
                    action_id,
                    device_id,
                    status,
                },
                Context::new(),
            ),
            RuntimeMessage::StateChanged {
                plugin_id,
                device_id,
                state_type_id,
                value,
            } => self.on_state_changed(plugin_id, device_id, state_type_id, value),
            RuntimeMessage::EventEmitted { plugin_id, event } => {
                self.on_event_emitted(plugin_id, event)
            }
            RuntimeMessage::AutoDevicesAppeared {
                plugin_id,
                device_class_id,
                descriptors,
            } => self.on_auto_devices_appeared(plugin_id, device_class_id, descriptors),
            RuntimeMessage::DeviceDisappeared {
                plugin_id,
                device_id,
            } => self.on_device_disappeared(plugin_id, device_id),
        }
    }

    /// Stop every plugin and close all bus devices. Open transactions are
    /// dropped; their completions are ignored.
    pub fn shutdown(&mut self) {
        for entry in self.plugins.values_mut() {
            debug!(plugin = %entry.name, "Shutting down plugin");
            entry.plugin.shutdown();
        }
        self.hardware.close_all();
        self.setups.clear();
        self.pairings.clear();
        self.discoveries.clear();
        info!(devices = self.devices.len(), "Device manager shut down");
    }

    // ==================== Internals ====================

    fn class_with_plugin(&self, device_class_id: &DeviceClassId) -> ThingResult<DeviceClass> {
        let class = self
            .catalog
            .find_class(device_class_id)
            .ok_or(ThingError::ClassNotFound)?;
        if !self.plugins.contains_key(&class.plugin_id) {
            return Err(ThingError::PluginNotFound);
        }
        Ok(class.clone())
    }

    /// Combine `base` with the source's params. The descriptor, if any, is
    /// looked up but not consumed.
    fn resolve_params(
        &self,
        class: &DeviceClass,
        base: &ParamList,
        source: &ParamSource,
    ) -> ThingResult<(ParamList, Option<DeviceDescriptor>)> {
        match source {
            ParamSource::Params(params) => Ok((base.merged(params), None)),
            ParamSource::Descriptor {
                descriptor_id,
                params,
            } => {
                let descriptor = self
                    .discoveries
                    .get(&class.id)
                    .and_then(|run| run.descriptors.get(descriptor_id))
                    .cloned()
                    .ok_or(ThingError::DeviceDescriptorNotFound)?;
                let merged = base.merged(&descriptor.params).merged(params);
                Ok((merged, Some(descriptor)))
            }
        }
    }

    fn consume_descriptor(&mut self, device_class_id: &DeviceClassId, id: &DeviceDescriptorId) {
        if let Some(run) = self.discoveries.get_mut(device_class_id) {
            run.descriptors.shift_remove(id);
        }
    }

    /// Insert a new device with verified params and start its setup
    #[allow(clippy::too_many_arguments)]
    fn create_device(
        &mut self,
        class: &DeviceClass,
        id: DeviceId,
        name: String,
        params: ParamList,
        parent_id: Option<DeviceId>,
        auto_created: bool,
        pairing: Option<PairingTransactionId>,
    ) -> ThingResult<()> {
        if self.devices.contains_key(&id) {
            return Err(ThingError::DuplicateUuid);
        }
        if let Some(parent_id) = parent_id {
            if !self.devices.contains_key(&parent_id) {
                warn!(%parent_id, "Parent device does not exist");
                return Err(ThingError::DeviceNotFound);
            }
        }

        let mut device = Device::new(id, class, name, params).with_parent(parent_id);
        device.auto_created = auto_created;
        device.settings = ParamList::new()
            .verified(&class.settings_types)
            .unwrap_or_default();
        device.setup_state = SetupState::Unconfigured
            .try_transition(SetupState::SettingUp)
            .map_err(|e| {
                warn!(device = %id, error = %e, "Cannot start setup");
                ThingError::SetupFailed
            })?;

        info!(device = %id, name = %device.name, "Adding device");
        self.devices.insert(id, device.clone());
        self.event_bus
            .fire_typed(DeviceAddedData { device }, Context::new());
        self.begin_setup(id, SetupKind::Add, pairing)
    }

    fn start_reconfigure(
        &mut self,
        device_id: DeviceId,
        params: ParamList,
        pairing: Option<PairingTransactionId>,
    ) -> ThingResult<()> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(ThingError::DeviceNotFound)?;
        if device.setup_state.is_busy() || self.setups.contains_key(&device_id) {
            warn!(device = %device_id, "Device is already being set up");
            return Err(ThingError::DeviceInUse);
        }
        device.setup_state = device
            .setup_state
            .try_transition(SetupState::Reconfiguring)
            .map_err(|e| {
                warn!(device = %device_id, error = %e, "Cannot reconfigure device");
                ThingError::DeviceInUse
            })?;

        let released = device.clone();
        let previous_params = std::mem::replace(&mut device.params, params);
        if let Some(entry) = self.plugins.get_mut(&released.plugin_id) {
            entry.plugin.device_removed(&released);
        }
        self.begin_setup(device_id, SetupKind::Reconfigure { previous_params }, pairing)
    }

    fn begin_setup(
        &mut self,
        device_id: DeviceId,
        kind: SetupKind,
        pairing: Option<PairingTransactionId>,
    ) -> ThingResult<()> {
        let device = self
            .devices
            .get(&device_id)
            .cloned()
            .ok_or(ThingError::DeviceNotFound)?;
        if self.setups.contains_key(&device_id) {
            warn!(device = %device_id, "Re-entrant setup rejected");
            return Err(ThingError::DeviceInUse);
        }

        let plugin_id = device.plugin_id;
        let info = SetupInfo::new(device, self.sender.clone());
        self.setups.insert(
            device_id,
            PendingSetup {
                transaction_id: info.transaction_id(),
                info: info.clone(),
                kind,
                pairing,
            },
        );

        let status = match self.plugins.get_mut(&plugin_id) {
            Some(entry) => entry.plugin.setup_device(info.clone()),
            None => {
                info.finish(ThingError::PluginNotFound, "");
                SetupStatus::Failure
            }
        };
        match status {
            SetupStatus::Async => {
                debug!(device = %device_id, "Setup continues asynchronously");
            }
            SetupStatus::Success | SetupStatus::Failure => {
                if !info.is_finished() {
                    let result = if status == SetupStatus::Success {
                        ThingError::NoError
                    } else {
                        ThingError::SetupFailed
                    };
                    info.finish(result, "");
                }
                self.process_until_setup_finished(device_id, info.transaction_id());
            }
        }
        Ok(())
    }

    /// Apply queued messages up to and including the completion of one
    /// synchronous setup; anything queued behind it stays for the control loop
    fn process_until_setup_finished(
        &mut self,
        device_id: DeviceId,
        transaction_id: SetupTransactionId,
    ) {
        while let Ok(message) = self.receiver.try_recv() {
            let done = matches!(
                &message,
                RuntimeMessage::SetupFinished { transaction_id: id, .. } if *id == transaction_id
            );
            self.handle_message(message);
            if done {
                return;
            }
        }
        debug!(device = %device_id, "Synchronous setup left no completion behind");
    }

    fn on_setup_finished(
        &mut self,
        transaction_id: SetupTransactionId,
        device_id: DeviceId,
        status: ThingError,
        message: String,
    ) {
        match self.setups.get(&device_id) {
            Some(pending) if pending.transaction_id == transaction_id => {}
            _ => {
                warn!(device = %device_id, %transaction_id, "Ignoring completion of a discarded setup");
                return;
            }
        }
        let Some(pending) = self.setups.remove(&device_id) else {
            return;
        };
        let Some(device) = self.devices.get_mut(&device_id) else {
            warn!(device = %device_id, "Setup finished for a device that no longer exists");
            return;
        };

        let target = if status.is_ok() {
            SetupState::Configured
        } else {
            SetupState::SetupFailed
        };
        match device.setup_state.try_transition(target) {
            Ok(state) => device.setup_state = state,
            Err(e) => {
                warn!(device = %device_id, error = %e, "Dropping setup completion");
                return;
            }
        }
        device.setup_status = status;
        device.setup_message = message.clone();
        let reconfigure = match pending.kind {
            SetupKind::Add => false,
            SetupKind::Reconfigure { previous_params } => {
                if !status.is_ok() {
                    device.params = previous_params;
                }
                true
            }
        };
        let device = device.clone();

        if status.is_ok() {
            info!(device = %device_id, "Device set up");
        } else {
            warn!(device = %device_id, %status, %message, "Device setup failed");
        }

        if reconfigure {
            self.event_bus.fire_typed(
                DeviceReconfigurationFinishedData {
                    device_id,
                    status,
                    message,
                },
                Context::new(),
            );
            self.event_bus.fire_typed(
                DeviceChangedData {
                    device: device.clone(),
                },
                Context::new(),
            );
        } else {
            self.event_bus.fire_typed(
                DeviceSetupFinishedData {
                    device_id,
                    status,
                    message,
                },
                Context::new(),
            );
        }

        if status.is_ok() {
            if let Some(entry) = self.plugins.get_mut(&device.plugin_id) {
                entry.plugin.post_setup_device(&device);
            }
        }

        if let Some(transaction_id) = pending.pairing {
            self.pairings.remove(&transaction_id);
            self.fire_pairing_finished(transaction_id, status, Some(device_id));
        }
    }

    /// Hand-off for the next plugin step of a pairing; completions of
    /// earlier hand-offs stop counting
    fn pairing_info(
        &mut self,
        transaction_id: PairingTransactionId,
        phase: PairingPhase,
    ) -> Option<PairingInfo> {
        self.next_attempt += 1;
        let pairing = self.pairings.get_mut(&transaction_id)?;
        pairing.attempt = self.next_attempt;
        Some(PairingInfo::new(
            transaction_id,
            phase,
            pairing.attempt,
            pairing.device_class_id,
            pairing.device_id,
            pairing.name.clone(),
            pairing.params.clone(),
            self.sender.clone(),
        ))
    }

    fn on_pairing_finished(
        &mut self,
        transaction_id: PairingTransactionId,
        phase: PairingPhase,
        attempt: u64,
        status: ThingError,
        message: String,
    ) {
        let Some(pairing) = self.pairings.get_mut(&transaction_id) else {
            warn!(%transaction_id, "Pairing completion for unknown transaction");
            return;
        };
        let expected = match phase {
            PairingPhase::Start => PairingStep::Started,
            PairingPhase::Confirm => PairingStep::Confirming,
        };
        if pairing.step != expected || pairing.attempt != attempt {
            warn!(%transaction_id, ?phase, attempt, step = ?pairing.step, "Ignoring stale pairing completion");
            return;
        }

        if !status.is_ok() {
            debug!(%transaction_id, %status, %message, "Pairing rejected by plugin");
            self.pairings.remove(&transaction_id);
            self.fire_pairing_finished(transaction_id, status, None);
            return;
        }

        match phase {
            PairingPhase::Start => {
                debug!(%transaction_id, %message, "Pairing started, waiting for confirmation");
                pairing.step = PairingStep::AwaitingConfirmation;
            }
            PairingPhase::Confirm => self.complete_pairing(transaction_id),
        }
    }

    /// Create or reconfigure the paired device; failures end the pairing
    fn complete_pairing(&mut self, transaction_id: PairingTransactionId) {
        let Some(pairing) = self.pairings.get_mut(&transaction_id) else {
            return;
        };
        pairing.step = PairingStep::SettingUp;
        let device_id = pairing.device_id;
        let reconfigure = pairing.reconfigure;
        let name = pairing.name.clone();
        let params = pairing.params.clone();
        let parent_id = pairing.parent_id;
        let device_class_id = pairing.device_class_id;

        let result = if reconfigure {
            self.start_reconfigure(device_id, params, Some(transaction_id))
        } else {
            match self.class_with_plugin(&device_class_id) {
                Ok(class) => self.create_device(
                    &class,
                    device_id,
                    name,
                    params,
                    parent_id,
                    false,
                    Some(transaction_id),
                ),
                Err(e) => Err(e),
            }
        };
        if let Err(status) = result {
            warn!(%transaction_id, %status, "Paired device could not be set up");
            self.pairings.remove(&transaction_id);
            self.fire_pairing_finished(transaction_id, status, None);
        }
    }

    fn fire_pairing_finished(
        &self,
        transaction_id: PairingTransactionId,
        status: ThingError,
        device_id: Option<DeviceId>,
    ) {
        self.event_bus.fire_typed(
            PairingFinishedData {
                transaction_id,
                status,
                device_id,
            },
            Context::new(),
        );
    }

    fn on_discovery_finished(
        &mut self,
        device_class_id: DeviceClassId,
        run: u64,
        status: ThingError,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        let Some(current) = self.discoveries.get_mut(&device_class_id) else {
            debug!(class = %device_class_id, run, "Discovery finished after shutdown");
            return;
        };
        if current.run != run {
            debug!(class = %device_class_id, run, current = current.run, "Ignoring superseded discovery run");
            return;
        }

        let descriptors: Vec<DeviceDescriptor> = if status.is_ok() {
            descriptors
                .into_iter()
                .filter(|d| {
                    let matches = d.device_class_id == device_class_id;
                    if !matches {
                        warn!(descriptor = %d.id, "Discovered descriptor has the wrong device class");
                    }
                    matches
                })
                .collect()
        } else {
            Vec::new()
        };
        current.descriptors = descriptors.iter().map(|d| (d.id, d.clone())).collect();
        debug!(class = %device_class_id, found = descriptors.len(), %status, "Discovery finished");

        self.event_bus.fire_typed(
            DevicesDiscoveredData {
                device_class_id,
                status,
                descriptors,
            },
            Context::new(),
        );
    }

    /// Look up a device a plugin is talking about, checking ownership
    fn owned_device(&self, plugin_id: PluginId, device_id: &DeviceId) -> Option<&Device> {
        match self.devices.get(device_id) {
            Some(device) if device.plugin_id == plugin_id => Some(device),
            Some(_) => {
                warn!(plugin = %plugin_id, device = %device_id, "Plugin does not own device");
                None
            }
            None => {
                debug!(plugin = %plugin_id, device = %device_id, "Message for unknown device");
                None
            }
        }
    }

    fn on_state_changed(
        &mut self,
        plugin_id: PluginId,
        device_id: DeviceId,
        state_type_id: StateTypeId,
        value: Value,
    ) {
        let Some(device) = self.owned_device(plugin_id, &device_id) else {
            return;
        };
        let Some(state_type) = self
            .catalog
            .find_class(&device.device_class_id)
            .and_then(|c| c.state_type(&state_type_id))
        else {
            warn!(device = %device_id, state = %state_type_id, "Unknown state type");
            return;
        };
        if !state_type.accepts(&value) {
            warn!(device = %device_id, state = %state_type.name, %value, "Rejecting state value");
            return;
        }

        let changed = self
            .devices
            .get_mut(&device_id)
            .is_some_and(|d| d.set_state_value(state_type_id, value.clone()));
        if changed {
            self.event_bus.fire_typed_from(
                DeviceStateChangedData {
                    device_id,
                    state_type_id,
                    value,
                },
                Context::from_plugin(plugin_id),
                EventOrigin::Plugin,
            );
        }
    }

    fn on_event_emitted(&mut self, plugin_id: PluginId, event: DeviceEvent) {
        let Some(device) = self.owned_device(plugin_id, &event.device_id) else {
            return;
        };
        let known = self
            .catalog
            .find_class(&device.device_class_id)
            .is_some_and(|c| c.event_type(&event.event_type_id).is_some());
        if !known {
            warn!(device = %event.device_id, event_type = %event.event_type_id, "Unknown event type");
            return;
        }
        self.event_bus.fire_typed_from(
            EventTriggeredData { event },
            Context::from_plugin(plugin_id),
            EventOrigin::Plugin,
        );
    }

    fn on_auto_devices_appeared(
        &mut self,
        plugin_id: PluginId,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        let class = match self.catalog.find_class(&device_class_id) {
            Some(class) if class.plugin_id == plugin_id && class.supports(CreateMethod::Auto) => {
                class.clone()
            }
            _ => {
                warn!(plugin = %plugin_id, class = %device_class_id, "Rejecting auto devices");
                return;
            }
        };

        for descriptor in descriptors {
            if descriptor.device_class_id != device_class_id {
                warn!(descriptor = %descriptor.id, "Auto device has the wrong device class");
                continue;
            }
            let params = match descriptor.params.verified(&class.param_types) {
                Ok(params) => params,
                Err(e) => {
                    warn!(title = %descriptor.title, error = %e, "Auto device has invalid params");
                    continue;
                }
            };
            let id = descriptor.device_id.unwrap_or_else(DeviceId::generate);
            if let Err(e) = self.create_device(
                &class,
                id,
                descriptor.title,
                params,
                descriptor.parent_id,
                true,
                None,
            ) {
                warn!(device = %id, error = %e, "Could not add auto device");
            }
        }
    }

    fn on_device_disappeared(&mut self, plugin_id: PluginId, device_id: DeviceId) {
        if self.owned_device(plugin_id, &device_id).is_none() {
            return;
        }
        info!(device = %device_id, "Device disappeared");
        self.event_bus.fire_typed_from(
            DeviceDisappearedData { device_id },
            Context::from_plugin(plugin_id),
            EventOrigin::Plugin,
        );
        if let Err(e) = self.remove_configured_device(device_id) {
            debug!(device = %device_id, error = %e, "Disappeared device not removed");
        }
    }

    /// Post-order walk: descendants before `device_id`
    fn collect_subtree(&self, device_id: DeviceId, order: &mut Vec<DeviceId>) {
        let children: Vec<DeviceId> = self
            .find_child_devices(&device_id)
            .into_iter()
            .map(|d| d.id)
            .collect();
        for child in children {
            self.collect_subtree(child, order);
        }
        order.push(device_id);
    }

    fn remove_one(&mut self, device_id: DeviceId) {
        if let Some(pending) = self.setups.remove(&device_id) {
            debug!(device = %device_id, "Discarding pending setup");
            if let Some(transaction_id) = pending.pairing {
                self.pairings.remove(&transaction_id);
                self.fire_pairing_finished(transaction_id, ThingError::DeviceNotFound, None);
            }
        }
        let orphaned: Vec<PairingTransactionId> = self
            .pairings
            .iter()
            .filter(|(_, p)| p.reconfigure && p.device_id == device_id)
            .map(|(id, _)| *id)
            .collect();
        for transaction_id in orphaned {
            self.pairings.remove(&transaction_id);
            self.fire_pairing_finished(transaction_id, ThingError::DeviceNotFound, None);
        }

        let Some(mut device) = self.devices.shift_remove(&device_id) else {
            return;
        };
        if device.setup_state.can_transition_to(SetupState::Removed) {
            device.setup_state = SetupState::Removed;
        }
        if let Some(entry) = self.plugins.get_mut(&device.plugin_id) {
            entry.plugin.device_removed(&device);
        }
        info!(device = %device_id, name = %device.name, "Device removed");
        self.event_bus
            .fire_typed(DeviceRemovedData { device_id }, Context::new());
    }
}
