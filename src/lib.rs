// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Indoor air quality monitor for a K-30 CO2 sensor and a Si7021
//! temperature/humidity sensor sharing one Linux I2C bus.
//!
//! One thread samples both sensors every measurement interval, classifies the
//! CO2 concentration into a green/yellow/red indicator with hysteresis and
//! publishes the result through a [`SnapshotCoordinator`]. Reporting threads
//! copy consistent snapshots out of it at their own pace.
//!
//! Protocols taken from the K-30 I2C communication guide and the
//! [Si7021-A20 datasheet](https://www.silabs.com/documents/public/data-sheets/Si7021-A20.pdf).
//!
//! ## Basic Example
//!
//! Reading both sensors once
//!
//!```no_run
//!use iaq_monitor::bus::LinuxBus;
//!use iaq_monitor::delay::StdDelay;
//!use iaq_monitor::k30::{K30, K30_ADDRESS};
//!use iaq_monitor::si7021::Si7021;
//!
//!fn main() {
//!    // Open the I2C device
//!    let mut bus = LinuxBus::open("/dev/i2c-1", K30_ADDRESS).unwrap();
//!    let mut k30 = K30::new(StdDelay);
//!    let mut si7021 = Si7021::new(StdDelay);
//!
//!    match k30.read_co2(&mut bus) {
//!        Ok(ppm) => println!("Co2: {} ppm", ppm),
//!        Err(e) => println!("Error obtaining co2. More details: {}", e),
//!    }
//!    match si7021.read(&mut bus) {
//!        Ok(r) => println!("Temp: {:.2} C RH: {:.2} %", r.temperature, r.humidity),
//!        Err(e) => println!("Error obtaining temp/rh. More details: {}", e),
//!    }
//!}
//!```
//!

pub mod acquisition;
/// Bus transport trait and its Linux i2c-dev implementation
pub mod bus;
pub mod classifier;
pub mod config;
pub mod delay;
pub mod error;
pub mod indicator;
/// K-30 CO2 sensor operations
pub mod k30;
pub mod report;
/// Si7021 temperature and humidity sensor operations
pub mod si7021;
pub mod snapshot;

pub use acquisition::{AcquisitionLoop, CycleOutcome};
pub use classifier::{classify, IndicatorState};
pub use config::{Config, SharedConfig, ThresholdConfig};
pub use error::{Error, SensorError};
pub use snapshot::{MeasurementSnapshot, SnapshotCoordinator};
