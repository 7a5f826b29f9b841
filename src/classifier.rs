// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Air quality indicator with hysteresis around each CO2 threshold.

use std::fmt;

use crate::config::ThresholdConfig;

/// Traffic light state. `Off` only exists before the first classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndicatorState {
    #[default]
    Off,
    Green,
    Yellow,
    Red,
}

impl IndicatorState {
    /// Numeric code used in state files and reports.
    pub fn code(self) -> u8 {
        match self {
            IndicatorState::Off => 0,
            IndicatorState::Green => 1,
            IndicatorState::Yellow => 2,
            IndicatorState::Red => 3,
        }
    }
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            IndicatorState::Off => "off",
            IndicatorState::Green => "green",
            IndicatorState::Yellow => "yellow",
            IndicatorState::Red => "red",
        };
        f.write_str(name)
    }
}

/// Next indicator state for a CO2 reading in ppm.
///
/// Leaving RED needs the reading to drop below `red - hysteresis`, leaving
/// YELLOW downwards needs it below `yellow - hysteresis`. Entering a state
/// needs the plain threshold to be crossed. Both thresholds are exclusive.
///
/// Temperature and humidity thresholds are not consulted.
pub fn classify(co2: u16, thresholds: &ThresholdConfig, previous: IndicatorState) -> IndicatorState {
    let co2 = i32::from(co2);
    let hysteresis = thresholds.co2_hysteresis;

    let red = match previous {
        IndicatorState::Red => co2 > thresholds.co2_red - hysteresis,
        _ => co2 > thresholds.co2_red,
    };
    if red {
        return IndicatorState::Red;
    }

    let green = match previous {
        IndicatorState::Yellow => co2 < thresholds.co2_yellow - hysteresis,
        _ => co2 < thresholds.co2_yellow,
    };
    if green {
        IndicatorState::Green
    } else {
        IndicatorState::Yellow
    }
}
