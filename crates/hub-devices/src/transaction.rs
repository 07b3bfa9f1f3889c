//! Completion handles given to plugins
//!
//! Every asynchronous request the runtime hands to a plugin (setup, pairing
//! step, discovery, action) comes with a handle the plugin uses to report the
//! outcome. Handles are `Clone + Send`, so a plugin may finish from any
//! thread. Finishing never touches runtime state directly: it queues a
//! [`RuntimeMessage`] that the control thread applies in arrival order.
//! Only the first finish of a handle counts; later ones are logged and
//! dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hub_core::{
    Action, ActionId, Device, DeviceClassId, DeviceDescriptor, DeviceEvent, DeviceId,
    PairingTransactionId, ParamList, PluginId, SetupTransactionId, StateTypeId, ThingError,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) type MessageSender = mpsc::UnboundedSender<RuntimeMessage>;

/// Which step of a pairing a completion belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPhase {
    Start,
    Confirm,
}

/// Work queued for the runtime's control thread
#[derive(Debug, Clone)]
pub enum RuntimeMessage {
    SetupFinished {
        transaction_id: SetupTransactionId,
        device_id: DeviceId,
        status: ThingError,
        message: String,
    },
    PairingFinished {
        transaction_id: PairingTransactionId,
        phase: PairingPhase,
        attempt: u64,
        status: ThingError,
        message: String,
    },
    DiscoveryFinished {
        device_class_id: DeviceClassId,
        run: u64,
        status: ThingError,
        descriptors: Vec<DeviceDescriptor>,
    },
    ActionFinished {
        action_id: ActionId,
        device_id: DeviceId,
        status: ThingError,
    },
    StateChanged {
        plugin_id: PluginId,
        device_id: DeviceId,
        state_type_id: StateTypeId,
        value: Value,
    },
    EventEmitted {
        plugin_id: PluginId,
        event: DeviceEvent,
    },
    AutoDevicesAppeared {
        plugin_id: PluginId,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    },
    DeviceDisappeared {
        plugin_id: PluginId,
        device_id: DeviceId,
    },
}

/// Single-assignment completion slot shared by all clones of a handle
#[derive(Debug)]
struct Completion {
    finished: AtomicBool,
    created: Instant,
    sender: MessageSender,
}

impl Completion {
    fn new(sender: MessageSender) -> Arc<Self> {
        Arc::new(Self {
            finished: AtomicBool::new(false),
            created: Instant::now(),
            sender,
        })
    }

    fn complete(&self, what: &'static str, message: RuntimeMessage) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            warn!(transaction = what, "Transaction finished more than once, ignoring");
            return false;
        }
        if self.sender.send(message).is_err() {
            debug!(transaction = what, "Runtime stopped before completion arrived");
        }
        true
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// One in-flight setup (or reconfiguration) of a device
#[derive(Debug, Clone)]
pub struct SetupInfo {
    transaction_id: SetupTransactionId,
    device: Arc<Device>,
    completion: Arc<Completion>,
}

impl SetupInfo {
    pub(crate) fn new(device: Device, sender: MessageSender) -> Self {
        Self {
            transaction_id: SetupTransactionId::generate(),
            device: Arc::new(device),
            completion: Completion::new(sender),
        }
    }

    pub fn transaction_id(&self) -> SetupTransactionId {
        self.transaction_id
    }

    /// Snapshot of the device under setup, with its verified params
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id
    }

    /// Report the outcome. Returns false if this transaction was already finished.
    pub fn finish(&self, status: ThingError, message: impl Into<String>) -> bool {
        self.completion.complete(
            "setup",
            RuntimeMessage::SetupFinished {
                transaction_id: self.transaction_id,
                device_id: self.device.id,
                status,
                message: message.into(),
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    /// Time since the runtime opened this transaction
    pub fn elapsed(&self) -> Duration {
        self.completion.created.elapsed()
    }
}

/// One step of an interactive pairing
#[derive(Debug, Clone)]
pub struct PairingInfo {
    transaction_id: PairingTransactionId,
    phase: PairingPhase,
    /// Distinguishes this hand-off from earlier ones of the same transaction
    attempt: u64,
    device_class_id: DeviceClassId,
    device_id: DeviceId,
    name: String,
    params: ParamList,
    completion: Arc<Completion>,
}

impl PairingInfo {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transaction_id: PairingTransactionId,
        phase: PairingPhase,
        attempt: u64,
        device_class_id: DeviceClassId,
        device_id: DeviceId,
        name: String,
        params: ParamList,
        sender: MessageSender,
    ) -> Self {
        Self {
            transaction_id,
            phase,
            attempt,
            device_class_id,
            device_id,
            name,
            params,
            completion: Completion::new(sender),
        }
    }

    pub fn transaction_id(&self) -> PairingTransactionId {
        self.transaction_id
    }

    pub fn phase(&self) -> PairingPhase {
        self.phase
    }

    pub fn device_class_id(&self) -> DeviceClassId {
        self.device_class_id
    }

    /// Id the device will get once pairing succeeds
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ParamList {
        &self.params
    }

    pub fn finish(&self, status: ThingError, message: impl Into<String>) -> bool {
        self.completion.complete(
            "pairing",
            RuntimeMessage::PairingFinished {
                transaction_id: self.transaction_id,
                phase: self.phase,
                attempt: self.attempt,
                status,
                message: message.into(),
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    pub fn elapsed(&self) -> Duration {
        self.completion.created.elapsed()
    }
}

/// One discovery run for a device class
#[derive(Debug, Clone)]
pub struct DiscoveryInfo {
    device_class_id: DeviceClassId,
    run: u64,
    params: ParamList,
    completion: Arc<Completion>,
}

impl DiscoveryInfo {
    pub(crate) fn new(
        device_class_id: DeviceClassId,
        run: u64,
        params: ParamList,
        sender: MessageSender,
    ) -> Self {
        Self {
            device_class_id,
            run,
            params,
            completion: Completion::new(sender),
        }
    }

    pub fn device_class_id(&self) -> DeviceClassId {
        self.device_class_id
    }

    pub fn params(&self) -> &ParamList {
        &self.params
    }

    /// Report the candidates found; on error `descriptors` is ignored
    pub fn finish(&self, status: ThingError, descriptors: Vec<DeviceDescriptor>) -> bool {
        self.completion.complete(
            "discovery",
            RuntimeMessage::DiscoveryFinished {
                device_class_id: self.device_class_id,
                run: self.run,
                status,
                descriptors,
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }
}

/// One action execution
#[derive(Debug, Clone)]
pub struct ActionInfo {
    action: Action,
    device: Arc<Device>,
    completion: Arc<Completion>,
}

impl ActionInfo {
    pub(crate) fn new(action: Action, device: Device, sender: MessageSender) -> Self {
        Self {
            action,
            device: Arc::new(device),
            completion: Completion::new(sender),
        }
    }

    /// The action, with params verified against its action type
    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn finish(&self, status: ThingError) -> bool {
        self.completion.complete(
            "action",
            RuntimeMessage::ActionFinished {
                action_id: self.action.id,
                device_id: self.device.id,
                status,
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }
}
