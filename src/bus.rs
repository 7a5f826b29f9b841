// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Thin synchronous view of the I2C bus used by the sensor drivers.

use i2cdev::core::*;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

///
/// Bus error enum. `Select` is raised when the slave address
/// can not be programmed, `Transfer` when a write or read fails
/// at the I/O level.
///
#[derive(Debug, Error)]
pub enum BusError {
    /// The device file could not be opened
    #[error("failed to open i2c device {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: LinuxI2CError,
    },
    /// The slave address could not be selected
    #[error("failed to select slave address {address:#04x}: {source}")]
    Select {
        address: u16,
        #[source]
        source: io::Error,
    },
    /// Input/output error during a write or read
    #[error("transfer failed: {0}")]
    Transfer(#[from] io::Error),
}

impl BusError {
    /// I/O error kind behind this error.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            BusError::Open { .. } => io::ErrorKind::NotFound,
            BusError::Select { source, .. } | BusError::Transfer(source) => source.kind(),
        }
    }
}

/// Capability to talk to whichever device is currently selected on the bus.
///
/// `write` and `read` return the number of bytes actually moved; callers
/// compare it with the frame length and treat any difference as a failed
/// transfer.
pub trait BusTransport {
    /// Reprograms the bus target. Must precede every write/read pair.
    fn select(&mut self, address: u16) -> Result<(), BusError>;

    /// Writes `bytes` to the selected device.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError>;

    /// Reads `buf.len()` bytes from the selected device into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError>;
}

impl<T: BusTransport + ?Sized> BusTransport for &mut T {
    fn select(&mut self, address: u16) -> Result<(), BusError> {
        (**self).select(address)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        (**self).read(buf)
    }
}

/// Linux i2c-dev character device, wraps a LinuxI2CDevice.
///
/// The kernel performs each plain read/write as a single message and
/// either transfers the whole buffer or fails, so a successful call
/// reports the full length.
pub struct LinuxBus {
    pub i2cdev: LinuxI2CDevice,
    path: PathBuf,
}

impl LinuxBus {
    /// Opens the bus device at `path` with `address` selected.
    ///
    /// If fails, returns BusError::Open with the i2cdev error.
    pub fn open<P: AsRef<Path>>(path: P, address: u16) -> Result<LinuxBus, BusError> {
        let path = path.as_ref().to_path_buf();
        match LinuxI2CDevice::new(&path, address) {
            Ok(device) => Ok(LinuxBus {
                i2cdev: device,
                path,
            }),
            Err(source) => Err(BusError::Open { path, source }),
        }
    }

    /// Path of the opened device file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BusTransport for LinuxBus {
    fn select(&mut self, address: u16) -> Result<(), BusError> {
        self.i2cdev
            .set_slave_address(address)
            .map_err(|e| BusError::Select {
                address,
                source: io::Error::from(e),
            })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        self.i2cdev.write(bytes).map_err(io::Error::from)?;
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        self.i2cdev.read(buf).map_err(io::Error::from)?;
        Ok(buf.len())
    }
}
