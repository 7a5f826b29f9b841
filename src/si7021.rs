// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Si7021 temperature and relative humidity sensor over I2C.
//!
//! Operations taken from the Si7021-A20 datasheet. Humidity is measured in
//! hold master mode, so reads fail while the sensor stretches the clock and
//! are simply repeated.

use embedded_hal::delay::DelayNs;
use log::{debug, trace};

use crate::bus::BusTransport;
use crate::config::RetryPolicy;
use crate::error::{Fault, SensorError};

/// Slave address of the Si7021
pub const SI7021_ADDRESS: u16 = 0x40;

/// Measure relative humidity, hold master mode
pub const MEASURE_RH_HOLD: u8 = 0xE5;

/// Read temperature value from previous RH measurement
pub const READ_TEMP_FROM_RH: u8 = 0xE0;

/// Feedback constant for x^8 + x^5 + x^4 + 1, aligned to the 16 bit accumulator
const CRC_FEEDBACK: u16 = 0x1310 << 3;

const SENSOR: &str = "Si7021";

/// CRC-8 over `data`, MSB first, initial value 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc ^= CRC_FEEDBACK;
            }
            crc <<= 1;
        }
    }
    (crc >> 8) as u8
}

/// Converts a raw RH code to percent, clamped to [0, 100].
///
/// The datasheet formula can land slightly outside the physical range.
pub fn humidity_percent(raw: u16) -> f32 {
    let rh = 125.0 * f32::from(raw) / 65536.0 - 6.0;
    rh.clamp(0.0, 100.0)
}

/// Converts a raw temperature code to degrees Celsius.
pub fn temperature_celsius(raw: u16) -> f32 {
    175.72 * f32::from(raw) / 65536.0 - 46.85
}

/// One temperature/humidity reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature: f32,
    pub humidity: f32,
}

/// Si7021 driver. Does not own the bus; the caller lends it per reading.
pub struct Si7021<D> {
    address: u16,
    policy: RetryPolicy,
    delay: D,
}

/// Per step failure counters, each bounded by `max_attempts` on its own.
#[derive(Default)]
struct Budget {
    write: u32,
    read: u32,
    crc: u32,
}

impl<D: DelayNs> Si7021<D> {
    pub fn new(delay: D) -> Self {
        Si7021 {
            address: SI7021_ADDRESS,
            policy: RetryPolicy::default(),
            delay,
        }
    }

    /// Replace the retry tunables, effective from the next reading.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Measures humidity, then fetches the temperature taken during that
    /// measurement.
    ///
    /// The temperature is only requested after a humidity frame with a valid
    /// CRC. If either step runs out of retries no values are returned.
    pub fn read<B: BusTransport>(&mut self, bus: &mut B) -> Result<ClimateReading, SensorError> {
        bus.select(self.address).map_err(|source| SensorError::Bus {
            sensor: SENSOR,
            source,
        })?;

        let humidity = self.measure_humidity(bus)?;
        let temperature = self.read_temperature(bus)?;
        Ok(ClimateReading {
            temperature,
            humidity,
        })
    }

    fn measure_humidity<B: BusTransport>(&mut self, bus: &mut B) -> Result<f32, SensorError> {
        let mut budget = Budget::default();
        loop {
            let frame: [u8; 3] = self.exchange(bus, MEASURE_RH_HOLD, &mut budget)?;
            let [hi, lo, found] = frame;
            let expected = crc8(&[hi, lo]);
            if expected == found {
                return Ok(humidity_percent(u16::from_be_bytes([hi, lo])));
            }
            self.retry(&mut budget.crc, Fault::Crc { expected, found })?;
        }
    }

    // No checksum is sent with this response.
    fn read_temperature<B: BusTransport>(&mut self, bus: &mut B) -> Result<f32, SensorError> {
        let mut budget = Budget::default();
        let [hi, lo]: [u8; 2] = self.exchange(bus, READ_TEMP_FROM_RH, &mut budget)?;
        Ok(temperature_celsius(u16::from_be_bytes([hi, lo])))
    }

    fn exchange<B: BusTransport, const N: usize>(
        &mut self,
        bus: &mut B,
        command: u8,
        budget: &mut Budget,
    ) -> Result<[u8; N], SensorError> {
        while let Err(fault) = Fault::check_transfer(bus.write(&[command]), 1) {
            self.retry(&mut budget.write, fault)?;
        }
        let mut frame = [0u8; N];
        while let Err(fault) = Fault::check_transfer(bus.read(&mut frame), N) {
            self.retry(&mut budget.read, fault)?;
        }
        trace!("{} command {:#04x} response {:02x?}", SENSOR, command, frame);
        Ok(frame)
    }

    fn retry(&mut self, failures: &mut u32, fault: Fault) -> Result<(), SensorError> {
        *failures += 1;
        debug!("{} attempt {} failed: {}", SENSOR, failures, fault);
        if *failures >= self.policy.max_attempts {
            return Err(SensorError::Unavailable {
                sensor: SENSOR,
                attempts: *failures,
                last: fault,
            });
        }
        self.delay.delay_ms(self.policy.retry_delay_ms);
        Ok(())
    }
}
