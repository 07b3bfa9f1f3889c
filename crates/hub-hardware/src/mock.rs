//! In-memory port backend for tests and development.
//!
//! Ports are declared up front together with the slave addresses that
//! answer a scan. Everything written through a [`MockPort`] is recorded per
//! address, and reads are served from per-address queues.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::BusKind;
use crate::error::{HardwareError, Result};
use crate::port::{BusPort, PortBackend};

#[derive(Debug, Default)]
struct MockPortState {
    responders: BTreeSet<u16>,
    fail_open: bool,
    open_count: usize,
    written: HashMap<u16, Vec<Vec<u8>>>,
    reads: HashMap<u16, VecDeque<Vec<u8>>>,
}

/// Cloneable handle to a simulated set of bus ports
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    ports: Arc<Mutex<BTreeMap<String, MockPortState>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a port where `responders` answer a register scan
    pub fn with_port(self, port_name: &str, responders: &[u16]) -> Self {
        self.lock()
            .entry(port_name.to_string())
            .or_default()
            .responders
            .extend(responders.iter().copied());
        self
    }

    /// Add a port that is listed but cannot be opened
    pub fn with_failing_port(self, port_name: &str) -> Self {
        self.lock()
            .entry(port_name.to_string())
            .or_default()
            .fail_open = true;
        self
    }

    /// Queue bytes for the next read of `address` on `port_name`
    pub fn queue_read(&self, port_name: &str, address: u16, data: &[u8]) {
        self.lock()
            .entry(port_name.to_string())
            .or_default()
            .reads
            .entry(address)
            .or_default()
            .push_back(data.to_vec());
    }

    /// Buffers written to `address` on `port_name`, in write order
    pub fn written(&self, port_name: &str, address: u16) -> Vec<Vec<u8>> {
        self.lock()
            .get(port_name)
            .and_then(|port| port.written.get(&address).cloned())
            .unwrap_or_default()
    }

    pub fn open_count(&self, port_name: &str) -> usize {
        self.lock().get(port_name).map_or(0, |port| port.open_count)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, MockPortState>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PortBackend for MockBackend {
    fn available_ports(&self, kind: BusKind) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|name| name.starts_with(kind.port_prefix()))
            .cloned()
            .collect()
    }

    fn open(&self, _kind: BusKind, port_name: &str, address: u16) -> Result<Box<dyn BusPort>> {
        let mut ports = self.lock();
        let port = ports
            .get_mut(port_name)
            .ok_or_else(|| HardwareError::port_not_found(port_name))?;
        if port.fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "mock port refuses open").into());
        }
        port.open_count += 1;
        Ok(Box::new(MockPort {
            backend: self.clone(),
            port_name: port_name.to_string(),
            address,
        }))
    }

    fn detect(&self, _kind: BusKind, port_name: &str, address: u16) -> Result<bool> {
        self.lock()
            .get(port_name)
            .map(|port| port.responders.contains(&address))
            .ok_or_else(|| HardwareError::port_not_found(port_name))
    }
}

/// A port opened on a [`MockBackend`]
#[derive(Debug)]
pub struct MockPort {
    backend: MockBackend,
    port_name: String,
    address: u16,
}

impl Read for MockPort {
    /// Serves the next queued buffer, truncated to `buf`; 0 when none is queued
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut ports = self.backend.lock();
        let next = ports
            .get_mut(&self.port_name)
            .and_then(|port| port.reads.get_mut(&self.address))
            .and_then(|queue| queue.pop_front());
        match next {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.backend
            .lock()
            .entry(self.port_name.clone())
            .or_default()
            .written
            .entry(self.address)
            .or_default()
            .push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BusPort for MockPort {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn address(&self) -> u16 {
        self.address
    }
}
