//! The bus device trait implemented by plugins

use std::io;

use crate::bus::{BusDeviceKey, BusKind};
use crate::port::BusPort;

/// One physical peripheral on a bus, implemented by the plugin that drives it.
///
/// The bus manager only keeps a weak reference: dropping the last `Arc`
/// stops the device's worker.
///
/// `read_data` and `write_data` run on the device's worker thread with the
/// port already opened, so they may block (sleep, wait on the hardware).
/// The manager never calls two of them concurrently for the same device,
/// but they may run while other plugin code touches the same object, so any
/// state shared with the rest of the plugin needs its own locking.
pub trait BusDevice: Send + Sync + 'static {
    fn kind(&self) -> BusKind;

    /// Device node file name, e.g. `i2c-1` for `/dev/i2c-1`
    fn port_name(&self) -> &str;

    /// Slave address (I2C) or chip select (SPI)
    fn address(&self) -> u16;

    /// Produce one reading; called once per poll while reading is active
    fn read_data(&self, port: &mut dyn BusPort) -> io::Result<Vec<u8>>;

    /// Write one buffer queued through `BusManager::write_data`
    fn write_data(&self, port: &mut dyn BusPort, data: &[u8]) -> io::Result<()> {
        port.write_all(data)?;
        port.flush()
    }

    /// Deliver a reading; called on the control thread from
    /// `BusManager::dispatch_pending`
    fn data_read(&self, data: Vec<u8>) {
        let _ = data;
    }

    fn key(&self) -> BusDeviceKey {
        BusDeviceKey::new(self.kind(), self.port_name(), self.address())
    }
}
