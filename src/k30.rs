// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! K-30 CO2 sensor over I2C.
//!
//! Protocol taken from the K-30 I2C communication guide. The sensor does not
//! acknowledge its address while it is busy measuring, so failed transfers are
//! normal and are retried within a bounded budget.

use embedded_hal::delay::DelayNs;
use log::{debug, trace};

use crate::bus::BusTransport;
use crate::config::RetryPolicy;
use crate::error::{Fault, SensorError};

/// Default slave address of the K-30
pub const K30_ADDRESS: u16 = 0x68;

/// General call address used for the wake-up pulse
pub const WAKE_ADDRESS: u16 = 0x00;

/// Read 2 bytes (0x22) from RAM address 0x0008 (CO2 value), checksum 0x2A
pub const READ_CO2_REQUEST: [u8; 4] = [0x22, 0x00, 0x08, 0x2A];

/// Status byte reported with a complete reading
pub const STATUS_COMPLETE: u8 = 0x21;

const WAKE_PULSE: [u8; 1] = [0x00];
const WAKE_SETTLE_MS: u32 = 1;
const RESPONSE_WAIT_MS: u32 = 20;
const SENSOR: &str = "K-30";

/// Validates a `{status, co2_hi, co2_lo, checksum}` frame and returns ppm.
///
/// The checksum is the byte sum of everything but itself.
pub fn parse_response(frame: &[u8; 4]) -> Result<u16, Fault> {
    let [status, hi, lo, checksum] = *frame;
    let expected = status.wrapping_add(hi).wrapping_add(lo);
    if expected != checksum {
        return Err(Fault::Checksum {
            expected,
            found: checksum,
        });
    }
    if status != STATUS_COMPLETE {
        return Err(Fault::NotReady { status });
    }
    Ok(u16::from_be_bytes([hi, lo]))
}

/// K-30 driver. Does not own the bus; the caller lends it per reading.
pub struct K30<D> {
    address: u16,
    policy: RetryPolicy,
    delay: D,
}

impl<D: DelayNs> K30<D> {
    /// Create a driver for the sensor on the standard address 0x68.
    pub fn new(delay: D) -> Self {
        K30::with_address(K30_ADDRESS, delay)
    }

    pub fn with_address(address: u16, delay: D) -> Self {
        K30 {
            address,
            policy: RetryPolicy::default(),
            delay,
        }
    }

    /// Replace the retry tunables, effective from the next reading.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Get the CO2 concentration in ppm.
    ///
    /// Write, read and integrity faults all count against one budget of
    /// `max_attempts`. A failed request write that finds half the budget
    /// already spent waits `stall_delay` instead of `retry_delay`, the sensor
    /// may be in the middle of a measurement. Once the budget is spent, returns
    /// `SensorError::Unavailable`. Failing to select an address returns
    /// `SensorError::Bus`.
    pub fn read_co2<B: BusTransport>(&mut self, bus: &mut B) -> Result<u16, SensorError> {
        let mut failures = 0u32;
        loop {
            self.wake(bus)?;
            let frame = loop {
                if let Err(fault) = self.send_request(bus) {
                    self.retry(&mut failures, fault, true)?;
                    continue;
                }
                self.delay.delay_ms(RESPONSE_WAIT_MS);
                match self.receive(bus) {
                    Ok(frame) => break frame,
                    Err(fault) => self.retry(&mut failures, fault, false)?,
                }
            };
            match parse_response(&frame) {
                Ok(ppm) => return Ok(ppm),
                Err(fault) => self.retry(&mut failures, fault, false)?,
            }
        }
    }

    fn select<B: BusTransport>(&self, bus: &mut B, address: u16) -> Result<(), SensorError> {
        bus.select(address).map_err(|source| SensorError::Bus {
            sensor: SENSOR,
            source,
        })
    }

    // Nothing lives on the general call address, the write is expected to fail.
    fn wake<B: BusTransport>(&mut self, bus: &mut B) -> Result<(), SensorError> {
        self.select(bus, WAKE_ADDRESS)?;
        let _ = bus.write(&WAKE_PULSE);
        self.delay.delay_ms(WAKE_SETTLE_MS);
        self.select(bus, self.address)
    }

    fn send_request<B: BusTransport>(&mut self, bus: &mut B) -> Result<(), Fault> {
        Fault::check_transfer(bus.write(&READ_CO2_REQUEST), READ_CO2_REQUEST.len())
    }

    fn receive<B: BusTransport>(&mut self, bus: &mut B) -> Result<[u8; 4], Fault> {
        let mut frame = [0u8; 4];
        Fault::check_transfer(bus.read(&mut frame), frame.len())?;
        trace!("{} response {:02x?}", SENSOR, frame);
        Ok(frame)
    }

    fn retry(&mut self, failures: &mut u32, fault: Fault, write: bool) -> Result<(), SensorError> {
        let spent = *failures;
        *failures += 1;
        debug!("{} attempt {} failed: {}", SENSOR, failures, fault);
        if *failures >= self.policy.max_attempts {
            return Err(SensorError::Unavailable {
                sensor: SENSOR,
                attempts: *failures,
                last: fault,
            });
        }
        if write && spent == self.policy.max_attempts / 2 {
            self.delay.delay_ms(self.policy.stall_delay_ms);
        } else {
            self.delay.delay_ms(self.policy.retry_delay_ms);
        }
        Ok(())
    }
}
