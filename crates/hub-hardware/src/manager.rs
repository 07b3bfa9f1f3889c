//! Bus manager: opens bus devices and runs their I/O workers
//!
//! Every open device gets a dedicated worker thread that owns the OS port.
//! The worker drains the device's write queue first, then polls when the
//! next read is due. Readings travel back over a channel and are only handed
//! to the plugin when the control thread calls [`BusManager::dispatch_pending`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, instrument, trace, warn};

use crate::bus::{BusDeviceKey, BusKind, DEFAULT_POLL_INTERVAL};
use crate::device::BusDevice;
use crate::error::{HardwareError, Result};
use crate::port::{BusPort, PortBackend};

/// Addresses that answered on one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub port_name: String,
    pub addresses: Vec<u16>,
}

/// A reading produced on a worker, waiting for the control thread
struct Reading {
    key: BusDeviceKey,
    generation: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct WorkerState {
    writes: VecDeque<Vec<u8>>,
    poll_interval: Option<Duration>,
    next_poll: Option<Instant>,
    closing: bool,
}

#[derive(Default)]
struct WorkerShared {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

impl WorkerShared {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct DeviceSlot {
    device: Weak<dyn BusDevice>,
    shared: Arc<WorkerShared>,
    /// Distinguishes this open from earlier opens of the same key
    generation: u64,
    worker: JoinHandle<()>,
}

enum Job {
    Write(Vec<u8>),
    Read,
}

/// Manager for one bus kind
pub struct BusManager {
    kind: BusKind,
    backend: Arc<dyn PortBackend>,
    default_interval: Duration,
    slots: Mutex<HashMap<BusDeviceKey, DeviceSlot>>,
    /// Workers of closed devices that may still be inside a callback
    retired: Mutex<HashMap<BusDeviceKey, JoinHandle<()>>>,
    readings_tx: mpsc::UnboundedSender<Reading>,
    readings_rx: Mutex<mpsc::UnboundedReceiver<Reading>>,
    readings_ready: Arc<Notify>,
    next_generation: AtomicU64,
}

impl BusManager {
    pub fn new(kind: BusKind, backend: Arc<dyn PortBackend>) -> Self {
        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        Self {
            kind,
            backend,
            default_interval: DEFAULT_POLL_INTERVAL,
            slots: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
            readings_tx,
            readings_rx: Mutex::new(readings_rx),
            readings_ready: Arc::new(Notify::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Share a wake-up signal with other managers
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.readings_ready = notify;
        self
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Signalled whenever a worker queues a reading
    pub fn readings_ready(&self) -> Arc<Notify> {
        self.readings_ready.clone()
    }

    pub fn available_ports(&self) -> Vec<String> {
        self.backend.available_ports(self.kind)
    }

    /// Check one port, or every available port, for responding slaves
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub fn scan_registers(&self, port_name: Option<&str>) -> Result<Vec<ScanResult>> {
        let available = self.available_ports();
        let ports: Vec<String> = match port_name {
            Some(name) => {
                if !available.iter().any(|p| p == name) {
                    return Err(HardwareError::port_not_found(name));
                }
                vec![name.to_string()]
            }
            None => available,
        };

        let mut results = Vec::with_capacity(ports.len());
        for port in ports {
            let mut addresses = Vec::new();
            for address in self.kind.address_range() {
                if self.backend.detect(self.kind, &port, address)? {
                    addresses.push(address);
                }
            }
            debug!(port = %port, found = addresses.len(), "Scanned port");
            results.push(ScanResult {
                port_name: port,
                addresses,
            });
        }
        Ok(results)
    }

    /// Open a device and start its worker.
    ///
    /// Fails with [`HardwareError::Closing`] while the worker of an earlier
    /// open of the same device is still running, so callbacks for one device
    /// never overlap.
    #[instrument(skip_all, fields(device = %device.key()))]
    pub fn open(&self, device: &Arc<dyn BusDevice>) -> Result<()> {
        let key = device.key();
        if key.kind != self.kind {
            return Err(HardwareError::unsupported(format!(
                "{} device on the {} manager",
                key.kind, self.kind
            )));
        }
        key.validate()?;

        let mut slots = self.lock_slots();
        if slots.contains_key(&key) {
            return Err(HardwareError::AlreadyOpen {
                device: key.to_string(),
            });
        }
        self.reap(&key)?;

        let port = self.backend.open(self.kind, &key.port_name, key.address)?;
        let shared = Arc::new(WorkerShared::default());
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let worker = Worker {
            key: key.clone(),
            generation,
            device: Arc::downgrade(device),
            shared: shared.clone(),
            readings_tx: self.readings_tx.clone(),
            readings_ready: self.readings_ready.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("{}-{}-{:02x}", self.kind, key.port_name, key.address))
            .spawn(move || worker.run(port))?;

        slots.insert(
            key,
            DeviceSlot {
                device: Arc::downgrade(device),
                shared,
                generation,
                worker: handle,
            },
        );
        info!("Opened bus device");
        Ok(())
    }

    pub fn is_open(&self, device: &dyn BusDevice) -> bool {
        self.lock_slots().contains_key(&device.key())
    }

    pub fn is_reading(&self, device: &dyn BusDevice) -> bool {
        self.lock_slots()
            .get(&device.key())
            .map_or(false, |slot| slot.shared.lock().poll_interval.is_some())
    }

    pub fn open_devices(&self) -> Vec<BusDeviceKey> {
        let mut keys: Vec<_> = self.lock_slots().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Begin polling an open device.
    ///
    /// The interval is a lower bound between polls; queued writes and slow
    /// reads can stretch it.
    pub fn start_reading(&self, device: &dyn BusDevice, interval: Option<Duration>) -> Result<()> {
        let key = device.key();
        let slots = self.lock_slots();
        let slot = slots.get(&key).ok_or_else(|| HardwareError::not_open(&key))?;

        let interval = interval.unwrap_or(self.default_interval);
        {
            let mut state = slot.shared.lock();
            state.poll_interval = Some(interval);
            state.next_poll = Some(Instant::now());
        }
        slot.shared.wake.notify_one();
        debug!(device = %key, interval_ms = interval.as_millis() as u64, "Started reading");
        Ok(())
    }

    /// Stop polling; a no-op for devices that are not reading or not open
    pub fn stop_reading(&self, device: &dyn BusDevice) {
        let key = device.key();
        if let Some(slot) = self.lock_slots().get(&key) {
            let mut state = slot.shared.lock();
            if state.poll_interval.take().is_some() {
                state.next_poll = None;
                debug!(device = %key, "Stopped reading");
            }
        }
    }

    /// Queue a buffer for the device's worker; buffers are written in order
    pub fn write_data(&self, device: &dyn BusDevice, data: impl Into<Vec<u8>>) -> Result<()> {
        let key = device.key();
        let slots = self.lock_slots();
        let slot = slots.get(&key).ok_or_else(|| HardwareError::not_open(&key))?;

        let data = data.into();
        trace!(device = %key, len = data.len(), "Queueing write");
        slot.shared.lock().writes.push_back(data);
        slot.shared.wake.notify_one();
        Ok(())
    }

    /// Stop reading and release the port. Safe on a device that is not open.
    ///
    /// An I/O call already running on the worker finishes, but its reading
    /// is discarded and queued writes are dropped.
    pub fn close(&self, device: &dyn BusDevice) {
        let key = device.key();
        let slot = self.lock_slots().remove(&key);
        match slot {
            Some(slot) => {
                self.retire(key.clone(), slot);
                info!(device = %key, "Closed bus device");
            }
            None => trace!(device = %key, "Close on a device that is not open"),
        }
    }

    pub fn close_all(&self) {
        let slots: Vec<_> = self.lock_slots().drain().collect();
        for (key, slot) in slots {
            debug!(device = %key, "Closed bus device");
            self.retire(key, slot);
        }
    }

    /// Deliver queued readings to their devices.
    ///
    /// Must be called from the control thread. Readings of devices that were
    /// closed (or closed and reopened) since the poll are dropped. Returns
    /// the number of readings delivered.
    pub fn dispatch_pending(&self) -> usize {
        let mut readings = Vec::new();
        {
            let mut rx = self.readings_rx.lock().unwrap_or_else(PoisonError::into_inner);
            while let Ok(reading) = rx.try_recv() {
                readings.push(reading);
            }
        }

        let mut delivered = 0;
        for reading in readings {
            let device = self
                .lock_slots()
                .get(&reading.key)
                .filter(|slot| slot.generation == reading.generation)
                .and_then(|slot| slot.device.upgrade());
            match device {
                Some(device) => {
                    device.data_read(reading.data);
                    delivered += 1;
                }
                None => trace!(device = %reading.key, "Discarding stale reading"),
            }
        }
        delivered
    }

    /// Tell the worker to stop and keep its handle until it has exited
    fn retire(&self, key: BusDeviceKey, slot: DeviceSlot) {
        {
            let mut state = slot.shared.lock();
            state.closing = true;
            state.poll_interval = None;
            state.writes.clear();
        }
        slot.shared.wake.notify_all();
        self.lock_retired().insert(key, slot.worker);
    }

    /// Forget the retired worker of `key` once it has exited
    fn reap(&self, key: &BusDeviceKey) -> Result<()> {
        let mut retired = self.lock_retired();
        let Some(worker) = retired.remove(key) else {
            return Ok(());
        };
        if !worker.is_finished() {
            debug!(device = %key, "Previous worker still running");
            retired.insert(key.clone(), worker);
            return Err(HardwareError::Closing {
                device: key.to_string(),
            });
        }
        if worker.join().is_err() {
            warn!(device = %key, "Previous bus worker panicked");
        }
        Ok(())
    }

    fn lock_retired(&self) -> MutexGuard<'_, HashMap<BusDeviceKey, JoinHandle<()>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<BusDeviceKey, DeviceSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BusManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Everything a worker thread owns besides its port
struct Worker {
    key: BusDeviceKey,
    generation: u64,
    device: Weak<dyn BusDevice>,
    shared: Arc<WorkerShared>,
    readings_tx: mpsc::UnboundedSender<Reading>,
    readings_ready: Arc<Notify>,
}

impl Worker {
    fn run(self, mut port: Box<dyn BusPort>) {
        debug!(device = %self.key, "Bus worker started");
        while let Some(job) = self.next_job() {
            let Some(device) = self.device.upgrade() else {
                debug!(device = %self.key, "Bus device dropped by its plugin");
                break;
            };
            match job {
                Job::Write(data) => {
                    if let Err(e) = device.write_data(port.as_mut(), &data) {
                        warn!(device = %self.key, error = %e, "Bus write failed");
                    }
                }
                Job::Read => match device.read_data(port.as_mut()) {
                    Ok(data) => {
                        let reading = Reading {
                            key: self.key.clone(),
                            generation: self.generation,
                            data,
                        };
                        if self.readings_tx.send(reading).is_err() {
                            break;
                        }
                        self.readings_ready.notify_one();
                    }
                    Err(e) => warn!(device = %self.key, error = %e, "Bus read failed"),
                },
            }
        }
        // Dropping the port here releases the OS handle
        debug!(device = %self.key, "Bus worker stopped");
    }

    /// Block until there is something to do; `None` once the device closes
    fn next_job(&self) -> Option<Job> {
        let mut state = self.shared.lock();
        loop {
            if state.closing {
                return None;
            }
            if let Some(data) = state.writes.pop_front() {
                return Some(Job::Write(data));
            }
            match (state.poll_interval, state.next_poll) {
                (Some(interval), Some(due)) => {
                    let now = Instant::now();
                    if now >= due {
                        state.next_poll = Some(now + interval);
                        return Some(Job::Read);
                    }
                    state = self
                        .shared
                        .wake
                        .wait_timeout(state, due - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                _ => {
                    state = self
                        .shared
                        .wake
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}
