//! Port backends: how a bus manager reaches the OS

use nix::errno::Errno;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::bus::BusKind;
use crate::error::{HardwareError, Result};

mod ioctl {
    // linux/i2c-dev.h
    nix::ioctl_write_int_bad!(i2c_slave, 0x0703);
    // linux/spi/spidev.h: SPI_IOC_RD_MODE
    nix::ioctl_read!(spi_read_mode, b'k', 1, u8);
}

/// An opened port, handed to `BusDevice::read_data`/`write_data` with the
/// slave already selected
pub trait BusPort: Read + Write + Send {
    fn port_name(&self) -> &str;

    fn address(&self) -> u16;

    /// OS handle for transfers that need their own ioctls (`I2C_RDWR`,
    /// `SPI_IOC_MESSAGE`). `None` for ports without one, such as mock ports.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Source of bus ports
pub trait PortBackend: Send + Sync {
    /// Port names of `kind` present on this host, sorted
    fn available_ports(&self, kind: BusKind) -> Vec<String>;

    fn open(&self, kind: BusKind, port_name: &str, address: u16) -> Result<Box<dyn BusPort>>;

    /// Whether a slave answers at `address`
    fn detect(&self, kind: BusKind, port_name: &str, address: u16) -> Result<bool>;
}

/// Device nodes in a directory, normally `/dev`.
///
/// On character devices `open` selects the slave: `I2C_SLAVE` for I2C, and
/// for SPI a check that the address is the node's chip select
/// (`spidev<bus>.<cs>`) and that the node answers `SPI_IOC_RD_MODE`. Regular
/// files stand in for device nodes in tests and are opened as they are.
#[derive(Debug, Clone)]
pub struct DevfsBackend {
    dev_dir: PathBuf,
}

impl DevfsBackend {
    pub fn new(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    pub fn dev_dir(&self) -> &Path {
        &self.dev_dir
    }

    fn open_port(&self, kind: BusKind, port_name: &str, address: u16) -> Result<DevfsPort> {
        kind.validate_port_name(port_name)?;
        kind.validate_address(address)?;
        let path = self.dev_dir.join(port_name);
        if !path.exists() {
            return Err(HardwareError::port_not_found(port_name));
        }
        if kind == BusKind::Spi && spi_chip_select(port_name).map_or(false, |cs| cs != address) {
            return Err(HardwareError::InvalidAddress { kind, address });
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if file.metadata()?.file_type().is_char_device() {
            select_slave(kind, &file, address)?;
        } else {
            trace!(path = %path.display(), "Not a character device, no slave selection");
        }
        Ok(DevfsPort {
            file,
            port_name: port_name.to_string(),
            address,
        })
    }
}

impl Default for DevfsBackend {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl PortBackend for DevfsBackend {
    fn available_ports(&self, kind: BusKind) -> Vec<String> {
        let entries = match fs::read_dir(&self.dev_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dev_dir.display(), error = %e, "Cannot list device directory");
                return Vec::new();
            }
        };

        let mut ports: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(kind.port_prefix()))
            .collect();
        ports.sort();
        ports
    }

    fn open(&self, kind: BusKind, port_name: &str, address: u16) -> Result<Box<dyn BusPort>> {
        let port = self.open_port(kind, port_name, address)?;
        debug!(port = port_name, address, "Opened bus port");
        Ok(Box::new(port))
    }

    /// I2C: select the address and try a one-byte read, like `i2cdetect -r`.
    /// An address claimed by a kernel driver counts as present. SPI has no
    /// acknowledge, so a node that opens for the address is a device.
    fn detect(&self, kind: BusKind, port_name: &str, address: u16) -> Result<bool> {
        let mut port = match self.open_port(kind, port_name, address) {
            Ok(port) => port,
            Err(HardwareError::InvalidAddress { .. }) if kind == BusKind::Spi => return Ok(false),
            Err(HardwareError::Io(e)) if e.raw_os_error() == Some(Errno::EBUSY as i32) => {
                return Ok(true)
            }
            Err(e) => return Err(e),
        };
        if kind == BusKind::Spi {
            return Ok(true);
        }

        let mut byte = [0u8; 1];
        match port.read(&mut byte) {
            Ok(n) => Ok(n == 1),
            Err(e) if no_acknowledge(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn select_slave(kind: BusKind, file: &File, address: u16) -> Result<()> {
    let fd = file.as_raw_fd();
    match kind {
        BusKind::I2c => {
            // SAFETY: `fd` belongs to `file`, which outlives the call
            unsafe { ioctl::i2c_slave(fd, i32::from(address)) }.map_err(io::Error::from)?;
        }
        BusKind::Spi => {
            let mut mode = 0u8;
            // SAFETY: `fd` belongs to `file` and `mode` is a valid u8 out-pointer
            unsafe { ioctl::spi_read_mode(fd, &mut mode) }.map_err(io::Error::from)?;
            trace!(mode, "SPI node answers");
        }
    }
    Ok(())
}

/// Chip select of a `spidev<bus>.<cs>` node name
fn spi_chip_select(port_name: &str) -> Option<u16> {
    let (_, cs) = port_name
        .strip_prefix(BusKind::Spi.port_prefix())?
        .split_once('.')?;
    cs.parse().ok()
}

/// Errors an I2C adapter reports when nobody acknowledges the address
fn no_acknowledge(error: &io::Error) -> bool {
    [Errno::ENXIO, Errno::EREMOTEIO, Errno::EIO, Errno::ETIMEDOUT]
        .iter()
        .any(|errno| error.raw_os_error() == Some(*errno as i32))
}

struct DevfsPort {
    file: File,
    port_name: String,
    address: u16,
}

impl Read for DevfsPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for DevfsPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BusPort for DevfsPort {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn address(&self) -> u16 {
        self.address
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}
