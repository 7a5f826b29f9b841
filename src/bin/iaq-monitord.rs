// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Air quality monitor daemon.
//!
//! Usage: `iaq-monitord [CONFIG]`, the config defaults to
//! `/etc/iaq-monitor.json`. Log verbosity follows `RUST_LOG`.

use env_logger::Env;
use log::{error, info, warn};
use std::convert::Infallible;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use iaq_monitor::bus::LinuxBus;
use iaq_monitor::config::{Config, ConfigWatcher, SharedConfig};
use iaq_monitor::delay::StdDelay;
use iaq_monitor::indicator::{IndicatorOutput, LogIndicator, SysfsLeds};
use iaq_monitor::k30::K30_ADDRESS;
use iaq_monitor::report::{LogSink, ReportingLoop, StateFileSink};
use iaq_monitor::{AcquisitionLoop, Error, SnapshotCoordinator};

const DEFAULT_CONFIG_PATH: &str = "/etc/iaq-monitor.json";

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run() {
        Ok(never) => match never {},
        Err(e) => {
            error!("{}. terminating", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<Infallible, Error> {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&path)?;
    let shared = SharedConfig::new(config.clone());
    let coordinator = Arc::new(SnapshotCoordinator::new());

    let bus = LinuxBus::open(&config.i2c_device, K30_ADDRESS)?;
    info!("opened {}", bus.path().display());

    let indicator: Box<dyn IndicatorOutput + Send> = match &config.gpio_root {
        Some(root) => Box::new(SysfsLeds::open(
            root,
            [config.green_pin, config.yellow_pin, config.red_pin],
        )?),
        None => Box::new(LogIndicator),
    };

    let logger = ReportingLoop::new(
        Arc::clone(&coordinator),
        shared.clone(),
        Config::logging_period,
        LogSink::new(config.room.clone()),
    );
    thread::Builder::new()
        .name("report-log".into())
        .spawn(move || logger.run())?;

    let state = match &config.state_dir {
        Some(dir) => {
            let sink = StateFileSink::create(dir)?;
            sink.write_thresholds(&config.thresholds)?;
            let writer = ReportingLoop::new(
                Arc::clone(&coordinator),
                shared.clone(),
                Config::measurement_period,
                sink.clone(),
            );
            thread::Builder::new()
                .name("report-state".into())
                .spawn(move || writer.run())?;
            Some(sink)
        }
        None => None,
    };

    let mut watcher = ConfigWatcher::new(path);
    if let Some(sink) = state.clone() {
        watcher = watcher.on_reload(move |c| sink.write_thresholds(&c.thresholds));
    }

    let acquisition =
        AcquisitionLoop::new(bus, StdDelay, indicator, shared, coordinator).with_watcher(watcher);
    let result = acquisition.run();
    if let Some(sink) = &state {
        if let Err(e) = sink.remove_all() {
            warn!("could not remove state files from {}: {}", sink.dir().display(), e);
        }
    }
    Ok(result?)
}
