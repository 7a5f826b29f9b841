// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Daemon configuration.
//!
//! Read from a JSON object whose keys are all optional. Values that are
//! present but out of range are replaced by their default, and the
//! replacement is logged.

use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use crate::error::ConfigError;

pub const DEFAULT_I2C_DEVICE: &str = "/dev/i2c-1";
/// Seconds between two acquisition cycles
pub const DEFAULT_MEASUREMENT_INTERVAL: u64 = 10;
/// Minutes between two log reports
pub const DEFAULT_LOGGING_INTERVAL: u64 = 5;

pub const DEFAULT_GREEN_PIN: u8 = 0;
pub const DEFAULT_YELLOW_PIN: u8 = 1;
pub const DEFAULT_RED_PIN: u8 = 2;
/// Highest usable pin number
pub const PIN_MAX: u8 = 20;

pub const DEFAULT_CO2_THRESHOLD_YELLOW: i32 = 1000;
pub const DEFAULT_CO2_THRESHOLD_RED: i32 = 1900;
pub const DEFAULT_CO2_HYSTERESIS: i32 = 200;
pub const DEFAULT_TEMP_THRESHOLD_YELLOW: f32 = 28.0;
pub const DEFAULT_TEMP_THRESHOLD_RED: f32 = 32.0;
pub const DEFAULT_RH_THRESHOLD_YELLOW: f32 = 80.0;
pub const DEFAULT_RH_THRESHOLD_RED: f32 = 100.0;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
pub const DEFAULT_RETRY_DELAY_MS: u32 = 10;
pub const DEFAULT_STALL_DELAY_MS: u32 = 4000;

/// Alert thresholds. CO2 values are in ppm, temperature in °C and
/// humidity in percent.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    #[serde(rename = "co2_threshold_yellow")]
    pub co2_yellow: i32,
    #[serde(rename = "co2_threshold_red")]
    pub co2_red: i32,
    pub co2_hysteresis: i32,
    #[serde(rename = "temp_threshold_yellow")]
    pub temp_yellow: f32,
    #[serde(rename = "temp_threshold_red")]
    pub temp_red: f32,
    #[serde(rename = "rh_threshold_yellow")]
    pub rh_yellow: f32,
    #[serde(rename = "rh_threshold_red")]
    pub rh_red: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdConfig {
            co2_yellow: DEFAULT_CO2_THRESHOLD_YELLOW,
            co2_red: DEFAULT_CO2_THRESHOLD_RED,
            co2_hysteresis: DEFAULT_CO2_HYSTERESIS,
            temp_yellow: DEFAULT_TEMP_THRESHOLD_YELLOW,
            temp_red: DEFAULT_TEMP_THRESHOLD_RED,
            rh_yellow: DEFAULT_RH_THRESHOLD_YELLOW,
            rh_red: DEFAULT_RH_THRESHOLD_RED,
        }
    }
}

/// Bounded retry tunables shared by both sensor drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed attempts after which a reading is given up
    pub max_attempts: u32,
    /// Wait after an ordinary failure
    pub retry_delay_ms: u32,
    /// Wait when the CO2 sensor looks stalled
    pub stall_delay_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            stall_delay_ms: DEFAULT_STALL_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub i2c_device: PathBuf,
    /// Seconds
    pub measurement_interval: u64,
    /// Minutes
    pub logging_interval: u64,
    pub green_pin: u8,
    pub yellow_pin: u8,
    pub red_pin: u8,
    #[serde(flatten)]
    pub thresholds: ThresholdConfig,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    /// Label attached to reports
    pub room: Option<String>,
    /// Directory for the plain text state files
    pub state_dir: Option<PathBuf>,
    /// sysfs GPIO root, e.g. `/sys/class/gpio`
    pub gpio_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            i2c_device: PathBuf::from(DEFAULT_I2C_DEVICE),
            measurement_interval: DEFAULT_MEASUREMENT_INTERVAL,
            logging_interval: DEFAULT_LOGGING_INTERVAL,
            green_pin: DEFAULT_GREEN_PIN,
            yellow_pin: DEFAULT_YELLOW_PIN,
            red_pin: DEFAULT_RED_PIN,
            thresholds: ThresholdConfig::default(),
            retry: RetryPolicy::default(),
            room: None,
            state_dir: None,
            gpio_root: None,
        }
    }
}

fn fall_back<T: std::fmt::Display>(key: &str, value: &mut T, default: T, why: &str) {
    info!("{}: {} ({}), using default value {}", key, why, value, default);
    *value = default;
}

impl Config {
    /// Parse a config from JSON text and sanitize it.
    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Read and parse the config file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        info!("reading config file {}", path.display());
        let text = fs::read_to_string(path)?;
        Config::from_json(&text)
    }

    /// Replaces every out of range value with its default.
    pub fn sanitized(mut self) -> Config {
        if self.measurement_interval < 1 {
            fall_back(
                "measurement_interval",
                &mut self.measurement_interval,
                DEFAULT_MEASUREMENT_INTERVAL,
                "out of range",
            );
        }
        if self.logging_interval < 1 {
            fall_back(
                "logging_interval",
                &mut self.logging_interval,
                DEFAULT_LOGGING_INTERVAL,
                "out of range",
            );
        }
        for (key, pin, default) in [
            ("green_pin", &mut self.green_pin, DEFAULT_GREEN_PIN),
            ("yellow_pin", &mut self.yellow_pin, DEFAULT_YELLOW_PIN),
            ("red_pin", &mut self.red_pin, DEFAULT_RED_PIN),
        ] {
            if *pin > PIN_MAX {
                fall_back(key, pin, default, "out of range (0..20)");
            }
        }

        let t = &mut self.thresholds;
        for (key, value, default) in [
            ("co2_threshold_yellow", &mut t.co2_yellow, DEFAULT_CO2_THRESHOLD_YELLOW),
            ("co2_threshold_red", &mut t.co2_red, DEFAULT_CO2_THRESHOLD_RED),
            ("co2_hysteresis", &mut t.co2_hysteresis, DEFAULT_CO2_HYSTERESIS),
        ] {
            if *value < 0 {
                fall_back(key, value, default, "cannot be negative");
            }
        }
        for (key, value, default) in [
            ("temp_threshold_red", &mut t.temp_red, DEFAULT_TEMP_THRESHOLD_RED),
            ("rh_threshold_yellow", &mut t.rh_yellow, DEFAULT_RH_THRESHOLD_YELLOW),
            ("rh_threshold_red", &mut t.rh_red, DEFAULT_RH_THRESHOLD_RED),
        ] {
            if *value < 0.0 {
                fall_back(key, value, default, "cannot be negative");
            }
        }

        if self.retry.max_attempts < 1 {
            fall_back(
                "max_attempts",
                &mut self.retry.max_attempts,
                DEFAULT_MAX_ATTEMPTS,
                "out of range",
            );
        }
        self
    }

    pub fn measurement_period(&self) -> Duration {
        Duration::from_secs(self.measurement_interval)
    }

    pub fn logging_period(&self) -> Duration {
        Duration::from_secs(self.logging_interval * 60)
    }
}

/// Configuration shared between threads and replaced as a whole.
///
/// Readers get an `Arc` to an immutable config, so a reload can never be
/// observed half applied.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        SharedConfig {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Config in effect right now.
    pub fn current(&self) -> Arc<Config> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new config, returns the previous one.
    pub fn replace(&self, config: Config) -> Arc<Config> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(config))
    }
}

/// Called with every config applied by a reload
pub type ReloadHook = Box<dyn FnMut(&Config) -> io::Result<()> + Send>;

/// Reloads the config file when its modification time changes.
pub struct ConfigWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
    on_reload: Option<ReloadHook>,
}

impl ConfigWatcher {
    /// Starts watching `path`, taking its current state as already loaded.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let modified = modified_time(&path);
        ConfigWatcher {
            path,
            modified,
            on_reload: None,
        }
    }

    /// Runs `hook` after each successful reload. A failing hook is logged,
    /// the new config stays applied.
    pub fn on_reload<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&Config) -> io::Result<()> + Send + 'static,
    {
        self.on_reload = Some(Box::new(hook));
        self
    }

    /// Checks the file and swaps a changed config into `shared`.
    ///
    /// Returns `true` when a new config was applied. A file that can not be
    /// read or parsed leaves the current config in place.
    pub fn poll(&mut self, shared: &SharedConfig) -> bool {
        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.modified {
            return false;
        }
        self.modified = modified;

        match Config::load(&self.path) {
            Ok(config) => {
                let previous = shared.replace(config.clone());
                if previous.i2c_device != config.i2c_device
                    || (previous.green_pin, previous.yellow_pin, previous.red_pin)
                        != (config.green_pin, config.yellow_pin, config.red_pin)
                    || previous.gpio_root != config.gpio_root
                {
                    warn!("i2c device and indicator pins only change on restart");
                }
                info!("config reloaded from {}", self.path.display());
                if let Some(hook) = self.on_reload.as_mut() {
                    if let Err(e) = hook(&config) {
                        warn!("reload hook failed: {}", e);
                    }
                }
                true
            }
            Err(e) => {
                warn!("keeping current config, reload failed: {}", e);
                false
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_gives_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.i2c_device, PathBuf::from("/dev/i2c-1"));
        assert_eq!(config.logging_period(), Duration::from_secs(300));
    }

    #[test]
    fn flat_keys_fill_nested_groups() {
        let config = Config::from_json(
            r#"{
                "i2c_device": "/dev/i2c-0",
                "co2_threshold_yellow": 800,
                "co2_threshold_red": 1500,
                "co2_hysteresis": 100,
                "rh_threshold_yellow": 70.5,
                "max_attempts": 10,
                "room": "B 204"
            }"#,
        )
        .unwrap();
        assert_eq!(config.i2c_device, PathBuf::from("/dev/i2c-0"));
        assert_eq!(config.thresholds.co2_yellow, 800);
        assert_eq!(config.thresholds.co2_red, 1500);
        assert_eq!(config.thresholds.co2_hysteresis, 100);
        assert_eq!(config.thresholds.rh_yellow, 70.5);
        assert_eq!(config.thresholds.temp_red, DEFAULT_TEMP_THRESHOLD_RED);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.stall_delay_ms, DEFAULT_STALL_DELAY_MS);
        assert_eq!(config.room.as_deref(), Some("B 204"));
    }

    #[test]
    fn out_of_range_values_fall_back_to_defaults() {
        let config = Config::from_json(
            r#"{
                "logging_interval": 0,
                "yellow_pin": 21,
                "red_pin": 20,
                "co2_threshold_red": -5,
                "co2_hysteresis": -1,
                "temp_threshold_yellow": -3.0,
                "rh_threshold_red": -1.0,
                "max_attempts": 0
            }"#,
        )
        .unwrap();
        assert_eq!(config.logging_interval, DEFAULT_LOGGING_INTERVAL);
        assert_eq!(config.yellow_pin, DEFAULT_YELLOW_PIN);
        assert_eq!(config.red_pin, 20);
        assert_eq!(config.thresholds.co2_red, DEFAULT_CO2_THRESHOLD_RED);
        assert_eq!(config.thresholds.co2_hysteresis, DEFAULT_CO2_HYSTERESIS);
        // a yellow temperature below zero is a legitimate setting
        assert_eq!(config.thresholds.temp_yellow, -3.0);
        assert_eq!(config.thresholds.rh_red, DEFAULT_RH_THRESHOLD_RED);
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Config::from_json("{ co2_threshold_red: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/iaq-monitor.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn replace_swaps_whole_config() {
        let shared = SharedConfig::new(Config::default());
        let before = shared.current();
        let mut next = Config::default();
        next.thresholds.co2_yellow = 700;
        next.thresholds.co2_red = 1200;

        let previous = shared.replace(next);
        assert_eq!(previous.thresholds, before.thresholds);
        // readers holding the old Arc keep a consistent view
        assert_eq!(before.thresholds.co2_yellow, DEFAULT_CO2_THRESHOLD_YELLOW);
        let now = shared.current();
        assert_eq!((now.thresholds.co2_yellow, now.thresholds.co2_red), (700, 1200));
    }

    #[test]
    fn watcher_applies_changed_file_and_keeps_config_on_bad_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"co2_threshold_yellow": 900}}"#).unwrap();
        let shared = SharedConfig::new(Config::load(file.path()).unwrap());
        let mut watcher = ConfigWatcher::new(file.path());

        assert!(!watcher.poll(&shared), "unchanged file must not reload");

        // pretend the last load happened long ago
        watcher.modified = Some(SystemTime::UNIX_EPOCH);
        fs::write(file.path(), r#"{"co2_threshold_yellow": 950}"#).unwrap();
        assert!(watcher.poll(&shared));
        assert_eq!(shared.current().thresholds.co2_yellow, 950);

        watcher.modified = Some(SystemTime::UNIX_EPOCH);
        fs::write(file.path(), "not json").unwrap();
        assert!(!watcher.poll(&shared));
        assert_eq!(shared.current().thresholds.co2_yellow, 950);
    }

    #[test]
    fn reload_rewrites_threshold_state_files() {
        let state = tempfile::tempdir().unwrap();
        let sink = crate::report::StateFileSink::create(state.path()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"co2_threshold_red": 1800}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        sink.write_thresholds(&config.thresholds).unwrap();
        let shared = SharedConfig::new(config);
        let mut watcher = ConfigWatcher::new(file.path())
            .on_reload(move |c| sink.write_thresholds(&c.thresholds));

        let read = |name: &str| fs::read_to_string(state.path().join(name)).unwrap();
        assert_eq!(read("co2_threshold_red"), "1800\n");

        watcher.modified = Some(SystemTime::UNIX_EPOCH);
        fs::write(
            file.path(),
            r#"{"co2_threshold_red": 1600, "rh_threshold_yellow": 65.5}"#,
        )
        .unwrap();
        assert!(watcher.poll(&shared));
        assert_eq!(read("co2_threshold_red"), "1600\n");
        assert_eq!(read("rh_threshold_yellow"), "65.500000\n");

        // a rejected file leaves the files of the config in effect
        watcher.modified = Some(SystemTime::UNIX_EPOCH);
        fs::write(file.path(), "{").unwrap();
        assert!(!watcher.poll(&shared));
        assert_eq!(read("co2_threshold_red"), "1600\n");
    }

    #[test]
    fn failing_reload_hook_keeps_new_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        let shared = SharedConfig::new(Config::default());
        let mut watcher = ConfigWatcher::new(file.path())
            .on_reload(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        watcher.modified = Some(SystemTime::UNIX_EPOCH);
        fs::write(file.path(), r#"{"co2_hysteresis": 150}"#).unwrap();
        assert!(watcher.poll(&shared));
        assert_eq!(shared.current().thresholds.co2_hysteresis, 150);
    }
}
