//! Control-thread actor
//!
//! [`DeviceRuntime::spawn`] moves a [`DeviceManager`] onto one tokio task.
//! That task is the only place the manager is touched: API calls arrive as
//! boxed closures through a [`RuntimeHandle`], plugin completions through
//! the manager's own queue and bus readings through the hardware notify.

use hub_core::{
    Action, ActionId, BrowserItem, BrowserItemId, Device, DeviceClassId, DeviceId,
    PairingTransactionId, ParamList, PluginId, ThingError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::manager::{DeviceManager, ParamSource};

/// Errors returned through a [`RuntimeHandle`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("device runtime has stopped")]
    Stopped,

    #[error(transparent)]
    Device(#[from] ThingError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

type RuntimeCall = Box<dyn FnOnce(&mut DeviceManager) + Send>;

enum Command {
    Call(RuntimeCall),
    Shutdown,
}

/// Cloneable access to a running [`DeviceRuntime`]
#[derive(Clone)]
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RuntimeHandle {
    /// Run `f` on the control task and return its result
    pub async fn call<R, F>(&self, f: F) -> RuntimeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DeviceManager) -> R + Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Call(Box::new(move |manager| {
                let _ = reply.send(f(manager));
            })))
            .map_err(|_| RuntimeError::Stopped)?;
        result.await.map_err(|_| RuntimeError::Stopped)
    }

    pub async fn add_configured_device(
        &self,
        device_class_id: DeviceClassId,
        name: impl Into<String>,
        source: ParamSource,
        device_id: Option<DeviceId>,
    ) -> RuntimeResult<DeviceId> {
        let name = name.into();
        Ok(self
            .call(move |m| m.add_configured_device(device_class_id, name, source, device_id))
            .await??)
    }

    pub async fn reconfigure_device(
        &self,
        device_id: DeviceId,
        source: ParamSource,
    ) -> RuntimeResult<()> {
        Ok(self
            .call(move |m| m.reconfigure_device(device_id, source))
            .await??)
    }

    pub async fn remove_configured_device(&self, device_id: DeviceId) -> RuntimeResult<()> {
        Ok(self
            .call(move |m| m.remove_configured_device(device_id))
            .await??)
    }

    pub async fn edit_device(&self, device_id: DeviceId, name: impl Into<String>) -> RuntimeResult<()> {
        let name = name.into();
        Ok(self.call(move |m| m.edit_device(device_id, name)).await??)
    }

    pub async fn set_device_settings(
        &self,
        device_id: DeviceId,
        settings: ParamList,
    ) -> RuntimeResult<()> {
        Ok(self
            .call(move |m| m.set_device_settings(device_id, settings))
            .await??)
    }

    pub async fn discover_devices(
        &self,
        device_class_id: DeviceClassId,
        params: ParamList,
    ) -> RuntimeResult<()> {
        Ok(self
            .call(move |m| m.discover_devices(device_class_id, params))
            .await??)
    }

    pub async fn pair_device(
        &self,
        transaction_id: PairingTransactionId,
        device_class_id: DeviceClassId,
        name: impl Into<String>,
        source: ParamSource,
    ) -> RuntimeResult<()> {
        let name = name.into();
        Ok(self
            .call(move |m| m.pair_device(transaction_id, device_class_id, name, source))
            .await??)
    }

    pub async fn confirm_pairing(
        &self,
        transaction_id: PairingTransactionId,
        secret: Option<String>,
    ) -> RuntimeResult<()> {
        Ok(self
            .call(move |m| m.confirm_pairing(transaction_id, secret.as_deref()))
            .await??)
    }

    pub async fn execute_action(&self, action: Action) -> RuntimeResult<ActionId> {
        Ok(self.call(move |m| m.execute_action(action)).await??)
    }

    pub async fn browse_device(
        &self,
        device_id: DeviceId,
        browser: impl Into<String>,
        node: Option<BrowserItemId>,
    ) -> RuntimeResult<Vec<BrowserItem>> {
        let browser = browser.into();
        Ok(self
            .call(move |m| m.browse_device(device_id, &browser, node.as_ref()))
            .await??)
    }

    pub async fn set_plugin_config(&self, plugin_id: PluginId, config: ParamList) -> RuntimeResult<()> {
        Ok(self
            .call(move |m| m.set_plugin_config(plugin_id, config))
            .await??)
    }

    pub async fn configured_devices(&self) -> RuntimeResult<Vec<Device>> {
        self.call(|m| m.configured_devices().cloned().collect())
            .await
    }

    pub async fn find_configured_device(&self, device_id: DeviceId) -> RuntimeResult<Option<Device>> {
        self.call(move |m| m.find_configured_device(&device_id).cloned())
            .await
    }
}

enum Step {
    Call(RuntimeCall),
    Message(crate::RuntimeMessage),
    Readings,
    Stop,
}

/// A [`DeviceManager`] running on its own task
pub struct DeviceRuntime {
    handle: RuntimeHandle,
    task: JoinHandle<DeviceManager>,
}

impl DeviceRuntime {
    /// Start the control task. Must be called from within a tokio runtime.
    pub fn spawn(manager: DeviceManager) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(manager, receiver));
        Self {
            handle: RuntimeHandle { commands },
            task,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Shut the manager down and hand it back
    pub async fn shutdown(self) -> RuntimeResult<DeviceManager> {
        let _ = self.handle.commands.send(Command::Shutdown);
        self.task.await.map_err(|_| RuntimeError::Stopped)
    }
}

async fn run(
    mut manager: DeviceManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> DeviceManager {
    let readings = manager.hardware().readings_ready();
    info!("Device runtime started");

    loop {
        let step = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Call(call)) => Step::Call(call),
                Some(Command::Shutdown) | None => Step::Stop,
            },
            Some(message) = manager.next_message() => Step::Message(message),
            _ = readings.notified() => Step::Readings,
        };

        match step {
            Step::Call(call) => call(&mut manager),
            Step::Message(message) => manager.handle_message(message),
            Step::Readings => {
                let delivered = manager.dispatch_bus_readings();
                debug!(delivered, "Delivered bus readings");
            }
            Step::Stop => break,
        }
    }

    manager.shutdown();
    info!("Device runtime stopped");
    manager
}
