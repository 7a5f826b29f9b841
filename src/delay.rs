// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

use embedded_hal::delay::DelayNs;
use std::{thread, time};

/// Blocking delay on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(time::Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(time::Duration::from_millis(u64::from(ms)));
    }
}
