// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types shared by the drivers, the acquisition loop and the daemon.

use std::io;
use thiserror::Error;

use crate::bus::BusError;

/// A single failed exchange with a sensor.
///
/// Faults are retryable; a driver only reports one to its caller as the
/// `last` cause of [`SensorError::Unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// The transport reported an I/O error for a write or read
    #[error("transfer failed ({0})")]
    Transfer(io::ErrorKind),
    /// The transport moved fewer (or more) bytes than the frame needs
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    /// Additive checksum of a K-30 response frame does not match
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    Checksum { expected: u8, found: u8 },
    /// K-30 answered, but its status byte is not "data ready"
    #[error("sensor not ready (status {status:#04x})")]
    NotReady { status: u8 },
    /// CRC-8 of a Si7021 humidity frame does not match
    #[error("crc mismatch: expected {expected:#04x}, found {found:#04x}")]
    Crc { expected: u8, found: u8 },
}

impl Fault {
    /// Classifies the outcome of a transfer that was expected to move
    /// `expected` bytes.
    pub(crate) fn check_transfer(
        result: Result<usize, BusError>,
        expected: usize,
    ) -> Result<(), Fault> {
        match result {
            Ok(actual) if actual == expected => Ok(()),
            Ok(actual) => Err(Fault::ShortTransfer { expected, actual }),
            Err(e) => Err(Fault::Transfer(e.kind())),
        }
    }
}

///
/// Sensor driver error. `Bus` means the slave address could
/// not be selected, so the link itself is unusable and the
/// daemon has to stop. `Unavailable` means the retry budget was
/// spent for this cycle; the previous value stays valid.
///
#[derive(Debug, Error)]
pub enum SensorError {
    /// Selecting the slave address failed
    #[error("bus fault while talking to {sensor}: {source}")]
    Bus {
        sensor: &'static str,
        #[source]
        source: BusError,
    },
    /// No valid reading within the retry budget
    #[error("{sensor} reading unavailable after {attempts} failed attempts, last fault: {last}")]
    Unavailable {
        sensor: &'static str,
        attempts: u32,
        last: Fault,
    },
}

impl SensorError {
    /// Whether the acquisition subsystem must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SensorError::Bus { .. })
    }
}

/// Configuration file could not be used
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top level error of the daemon
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
