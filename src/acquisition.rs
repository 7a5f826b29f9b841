// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Sampling loop. Sole owner of the bus and sole writer of the snapshot.

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use std::thread;

use crate::bus::BusTransport;
use crate::classifier::{classify, IndicatorState};
use crate::config::{ConfigWatcher, SharedConfig};
use crate::error::SensorError;
use crate::indicator::IndicatorOutput;
use crate::k30::K30;
use crate::si7021::Si7021;
use crate::snapshot::{MeasurementSnapshot, SnapshotCoordinator};

/// What one cycle managed to measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    pub co2_updated: bool,
    pub climate_updated: bool,
    pub snapshot: MeasurementSnapshot,
}

pub struct AcquisitionLoop<B, D, I> {
    bus: B,
    co2_sensor: K30<D>,
    climate_sensor: Si7021<D>,
    indicator: I,
    config: SharedConfig,
    coordinator: Arc<SnapshotCoordinator>,
    watcher: Option<ConfigWatcher>,
    current: MeasurementSnapshot,
}

impl<B, D, I> AcquisitionLoop<B, D, I>
where
    B: BusTransport,
    D: DelayNs + Clone,
    I: IndicatorOutput,
{
    pub fn new(
        bus: B,
        delay: D,
        indicator: I,
        config: SharedConfig,
        coordinator: Arc<SnapshotCoordinator>,
    ) -> Self {
        AcquisitionLoop {
            bus,
            co2_sensor: K30::new(delay.clone()),
            climate_sensor: Si7021::new(delay),
            indicator,
            config,
            coordinator,
            watcher: None,
            current: MeasurementSnapshot::default(),
        }
    }

    /// Reload the config from `watcher` before every cycle.
    pub fn with_watcher(mut self, watcher: ConfigWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn indicator_state(&self) -> IndicatorState {
        self.current.indicator
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Measures both sensors once, classifies and publishes.
    ///
    /// A sensor that stays unavailable keeps its previous values. Only a bus
    /// fault is returned as an error, the cycle is then rolled back and
    /// readers keep the last published snapshot.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, SensorError> {
        let config = self.config.current();
        self.co2_sensor.set_policy(config.retry);
        self.climate_sensor.set_policy(config.retry);

        let update = self.coordinator.begin_update();
        let mut staged = self.current;

        let co2_updated = match self.co2_sensor.read_co2(&mut self.bus) {
            Ok(ppm) => {
                staged.co2 = ppm;
                update.write(|s| s.co2 = ppm);
                true
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("error during co2 measurement: {}", e);
                false
            }
        };

        let climate_updated = match self.climate_sensor.read(&mut self.bus) {
            Ok(reading) => {
                staged.temperature = reading.temperature;
                staged.humidity = reading.humidity;
                update.write(|s| {
                    s.temperature = reading.temperature;
                    s.humidity = reading.humidity;
                });
                true
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("error during temp/rh measurement: {}", e);
                false
            }
        };

        let previous = staged.indicator;
        let next = classify(staged.co2, &config.thresholds, previous);
        if next != previous {
            info!("indicator {} -> {} at {} ppm", previous, next, staged.co2);
            if let Err(e) = self.indicator.show(next) {
                warn!("failed to drive indicator: {}", e);
            }
        }
        staged.indicator = next;
        update.write(|s| s.indicator = next);
        update.publish();
        self.current = staged;

        Ok(CycleOutcome {
            co2_updated,
            climate_updated,
            snapshot: staged,
        })
    }

    /// Runs cycles forever, one per measurement interval. Returns only on a
    /// bus fault.
    pub fn run(mut self) -> Result<Infallible, SensorError> {
        info!("acquisition started");
        loop {
            if let Some(watcher) = self.watcher.as_mut() {
                watcher.poll(&self.config);
            }
            if let Err(e) = self.run_cycle() {
                error!("{}, stopping acquisition", e);
                return Err(e);
            }
            thread::sleep(self.config.current().measurement_period());
        }
    }
}
