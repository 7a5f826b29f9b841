// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Consumers of the published snapshot.

use log::{info, warn};
use std::convert::Infallible;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{Config, SharedConfig, ThresholdConfig};
use crate::snapshot::{MeasurementSnapshot, SnapshotCoordinator};

/// Destination for consistent snapshots.
pub trait ReportSink {
    fn report(&mut self, snapshot: &MeasurementSnapshot) -> io::Result<()>;
}

impl ReportSink for Vec<Box<dyn ReportSink + Send>> {
    /// Reports to every sink, returns the first error after trying all.
    fn report(&mut self, snapshot: &MeasurementSnapshot) -> io::Result<()> {
        let mut result = Ok(());
        for sink in self.iter_mut() {
            if let Err(e) = sink.report(snapshot) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Writes one log line per snapshot.
#[derive(Debug, Default)]
pub struct LogSink {
    room: Option<String>,
}

impl LogSink {
    pub fn new(room: Option<String>) -> Self {
        LogSink { room }
    }
}

impl ReportSink for LogSink {
    fn report(&mut self, s: &MeasurementSnapshot) -> io::Result<()> {
        info!(
            "room={} co2={} temp={:.2} rh={:.2} led_state={}",
            self.room.as_deref().unwrap_or("-"),
            s.co2,
            s.temperature,
            s.humidity,
            s.indicator.code()
        );
        Ok(())
    }
}

const MEASUREMENT_FILES: [&str; 4] = ["co2", "temp", "rh", "led_state"];
const THRESHOLD_FILES: [&str; 7] = [
    "co2_threshold_yellow",
    "co2_threshold_red",
    "co2_hysteresis",
    "temp_threshold_yellow",
    "temp_threshold_red",
    "rh_threshold_yellow",
    "rh_threshold_red",
];

/// Keeps the last known values in small text files, one value per file.
#[derive(Debug, Clone)]
pub struct StateFileSink {
    dir: PathBuf,
}

impl StateFileSink {
    /// Creates `dir` if it does not exist yet.
    pub fn create<P: Into<PathBuf>>(dir: P) -> io::Result<StateFileSink> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(StateFileSink { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn put(&self, name: &str, value: String) -> io::Result<()> {
        fs::write(self.dir.join(name), value + "\n")
    }

    /// Stores the thresholds currently in effect.
    pub fn write_thresholds(&self, t: &ThresholdConfig) -> io::Result<()> {
        self.put("co2_threshold_yellow", t.co2_yellow.to_string())?;
        self.put("co2_threshold_red", t.co2_red.to_string())?;
        self.put("co2_hysteresis", t.co2_hysteresis.to_string())?;
        self.put("temp_threshold_yellow", format!("{:.6}", t.temp_yellow))?;
        self.put("temp_threshold_red", format!("{:.6}", t.temp_red))?;
        self.put("rh_threshold_yellow", format!("{:.6}", t.rh_yellow))?;
        self.put("rh_threshold_red", format!("{:.6}", t.rh_red))
    }

    /// Deletes every file this sink writes, so nothing stale outlives the
    /// daemon. Files that are already gone are skipped.
    pub fn remove_all(&self) -> io::Result<()> {
        for name in MEASUREMENT_FILES.iter().chain(THRESHOLD_FILES.iter()) {
            match fs::remove_file(self.dir.join(name)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

impl ReportSink for StateFileSink {
    fn report(&mut self, s: &MeasurementSnapshot) -> io::Result<()> {
        self.put("co2", s.co2.to_string())?;
        self.put("temp", format!("{:.2}", s.temperature))?;
        self.put("rh", format!("{:.2}", s.humidity))?;
        self.put("led_state", s.indicator.code().to_string())
    }
}

/// Picks the reporting period from the config in effect.
pub type Cadence = fn(&Config) -> Duration;

/// Forwards a consistent snapshot to a sink at its own cadence.
pub struct ReportingLoop<S> {
    coordinator: Arc<SnapshotCoordinator>,
    config: SharedConfig,
    cadence: Cadence,
    sink: S,
}

impl<S: ReportSink> ReportingLoop<S> {
    pub fn new(
        coordinator: Arc<SnapshotCoordinator>,
        config: SharedConfig,
        cadence: Cadence,
        sink: S,
    ) -> Self {
        ReportingLoop {
            coordinator,
            config,
            cadence,
            sink,
        }
    }

    /// Waits for a complete cycle and hands it to the sink. Sink errors are
    /// logged, not returned.
    pub fn report_once(&mut self) -> MeasurementSnapshot {
        let snapshot = self.coordinator.latest();
        if let Err(e) = self.sink.report(&snapshot) {
            warn!("could not report measurement: {}", e);
        }
        snapshot
    }

    pub fn run(mut self) -> Infallible {
        loop {
            self.report_once();
            thread::sleep((self.cadence)(&self.config.current()));
        }
    }
}
