// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Physical output of the indicator state.

use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::classifier::IndicatorState;

/// Receives indicator states. Callers only forward transitions.
pub trait IndicatorOutput {
    fn show(&mut self, state: IndicatorState) -> io::Result<()>;
}

impl<T: IndicatorOutput + ?Sized> IndicatorOutput for Box<T> {
    fn show(&mut self, state: IndicatorState) -> io::Result<()> {
        (**self).show(state)
    }
}

/// Logs every state it is given.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl IndicatorOutput for LogIndicator {
    fn show(&mut self, state: IndicatorState) -> io::Result<()> {
        info!("indicator: {}", state);
        Ok(())
    }
}

/// Levels of the (green, yellow, red) lines for `state`.
pub fn line_levels(state: IndicatorState) -> [bool; 3] {
    match state {
        IndicatorState::Off => [false, false, false],
        IndicatorState::Green => [true, false, false],
        IndicatorState::Yellow => [false, true, false],
        IndicatorState::Red => [false, false, true],
    }
}

/// Three LEDs on sysfs GPIO lines. All lines are switched off on drop.
pub struct SysfsLeds {
    values: [PathBuf; 3],
}

impl SysfsLeds {
    /// Sets up the green, yellow and red lines below `root`
    /// (usually `/sys/class/gpio`) as outputs and switches them off.
    pub fn open<P: AsRef<Path>>(root: P, pins: [u8; 3]) -> io::Result<SysfsLeds> {
        let root = root.as_ref();
        let mut values: [PathBuf; 3] = Default::default();
        for (value, pin) in values.iter_mut().zip(pins) {
            let line = root.join(format!("gpio{}", pin));
            if !line.exists() {
                fs::write(root.join("export"), pin.to_string())?;
            }
            fs::write(line.join("direction"), "out")?;
            *value = line.join("value");
        }
        let mut leds = SysfsLeds { values };
        leds.show(IndicatorState::Off)?;
        Ok(leds)
    }
}

impl IndicatorOutput for SysfsLeds {
    fn show(&mut self, state: IndicatorState) -> io::Result<()> {
        for (value, on) in self.values.iter().zip(line_levels(state)) {
            fs::write(value, if on { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl Drop for SysfsLeds {
    fn drop(&mut self) {
        if let Err(e) = self.show(IndicatorState::Off) {
            warn!("failed to switch indicator off: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_gpio(root: &Path, pins: [u8; 3]) {
        for pin in pins {
            fs::create_dir_all(root.join(format!("gpio{}", pin))).unwrap();
        }
    }

    fn read_levels(root: &Path, pins: [u8; 3]) -> Vec<String> {
        pins.iter()
            .map(|pin| fs::read_to_string(root.join(format!("gpio{}/value", pin))).unwrap())
            .collect()
    }

    #[test]
    fn exactly_one_line_is_lit() {
        let dir = tempfile::tempdir().unwrap();
        let pins = [17, 27, 22];
        fake_gpio(dir.path(), pins);

        let mut leds = SysfsLeds::open(dir.path(), pins).unwrap();
        assert_eq!(read_levels(dir.path(), pins), ["0", "0", "0"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("gpio27/direction")).unwrap(),
            "out"
        );

        leds.show(IndicatorState::Yellow).unwrap();
        assert_eq!(read_levels(dir.path(), pins), ["0", "1", "0"]);
        leds.show(IndicatorState::Red).unwrap();
        assert_eq!(read_levels(dir.path(), pins), ["0", "0", "1"]);

        drop(leds);
        assert_eq!(read_levels(dir.path(), pins), ["0", "0", "0"]);
    }

    #[test]
    fn missing_line_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        // no gpio directories and no kernel behind export: fails after writing export
        let err = SysfsLeds::open(dir.path(), [5, 6, 7]).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs::read_to_string(dir.path().join("export")).unwrap(), "5");
    }

    #[test]
    fn off_clears_every_line() {
        assert_eq!(line_levels(IndicatorState::Off), [false; 3]);
        assert_eq!(line_levels(IndicatorState::Green), [true, false, false]);
    }
}
