#![allow(dead_code)]

use embedded_hal::delay::DelayNs;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use iaq_monitor::bus::{BusError, BusTransport};
use iaq_monitor::k30::STATUS_COMPLETE;
use iaq_monitor::si7021::crc8;

/// Something that happened on the stub bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Select(u16),
    Write(u16, Vec<u8>),
    Read(u16, usize),
}

/// Scripted outcome of one transfer
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write: full length. Read: these bytes
    Data(Vec<u8>),
    /// Only this many bytes were moved
    Short(usize),
    /// I/O error
    Fail,
}

/// Bus stub answering from per-address scripts.
///
/// When a script is empty, writes succeed (except on address 0x00, where
/// nothing ever answers) and reads fail.
#[derive(Default)]
pub struct ScriptedBus {
    selected: u16,
    pub ops: Vec<Op>,
    writes: HashMap<u16, VecDeque<Reply>>,
    reads: HashMap<u16, VecDeque<Reply>>,
    /// Selects still allowed per address before they start failing
    failing_selects: HashMap<u16, usize>,
    dead: bool,
}

impl ScriptedBus {
    pub fn new() -> Self {
        ScriptedBus::default()
    }

    /// Every write and read fails, selects still work.
    pub fn dead() -> Self {
        ScriptedBus {
            dead: true,
            ..ScriptedBus::default()
        }
    }

    pub fn fail_select(&mut self, address: u16) -> &mut Self {
        self.fail_select_after(address, 0)
    }

    /// Lets `successes` selects of `address` through, fails every later one.
    pub fn fail_select_after(&mut self, address: u16, successes: usize) -> &mut Self {
        self.failing_selects.insert(address, successes);
        self
    }

    pub fn on_write(&mut self, address: u16, reply: Reply) -> &mut Self {
        self.writes.entry(address).or_default().push_back(reply);
        self
    }

    pub fn on_read(&mut self, address: u16, reply: Reply) -> &mut Self {
        self.reads.entry(address).or_default().push_back(reply);
        self
    }

    pub fn respond(&mut self, address: u16, frame: Vec<u8>) -> &mut Self {
        self.on_read(address, Reply::Data(frame))
    }

    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(a, bytes) if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reads_from(&self, address: u16) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::Read(a, _) if *a == address))
            .count()
    }

    pub fn selects_of(&self, address: u16) -> usize {
        self.ops
            .iter()
            .filter(|op| **op == Op::Select(address))
            .count()
    }
}

fn io_fail() -> BusError {
    BusError::Transfer(io::Error::new(io::ErrorKind::Other, "nack"))
}

impl BusTransport for ScriptedBus {
    fn select(&mut self, address: u16) -> Result<(), BusError> {
        self.ops.push(Op::Select(address));
        if let Some(left) = self.failing_selects.get_mut(&address) {
            if *left == 0 {
                return Err(BusError::Select {
                    address,
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                });
            }
            *left -= 1;
        }
        self.selected = address;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        let address = self.selected;
        self.ops.push(Op::Write(address, bytes.to_vec()));
        if self.dead {
            return Err(io_fail());
        }
        match self.writes.get_mut(&address).and_then(VecDeque::pop_front) {
            Some(Reply::Data(_)) => Ok(bytes.len()),
            Some(Reply::Short(n)) => Ok(n),
            Some(Reply::Fail) => Err(io_fail()),
            None if address == 0x00 => Err(io_fail()),
            None => Ok(bytes.len()),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        let address = self.selected;
        self.ops.push(Op::Read(address, buf.len()));
        if self.dead {
            return Err(io_fail());
        }
        match self.reads.get_mut(&address).and_then(VecDeque::pop_front) {
            Some(Reply::Data(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Reply::Short(n)) => Ok(n),
            Some(Reply::Fail) | None => Err(io_fail()),
        }
    }
}

/// Records requested delays in milliseconds instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    pub log: Arc<Mutex<Vec<u32>>>,
}

impl RecordingDelay {
    pub fn delays(&self) -> Vec<u32> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, ms: u32) -> usize {
        self.delays().iter().filter(|&&d| d == ms).count()
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.lock().unwrap().push(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.lock().unwrap().push(ms);
    }
}

/// Complete K-30 response for `ppm`
pub fn k30_frame(ppm: u16) -> Vec<u8> {
    let [hi, lo] = ppm.to_be_bytes();
    vec![
        STATUS_COMPLETE,
        hi,
        lo,
        STATUS_COMPLETE.wrapping_add(hi).wrapping_add(lo),
    ]
}

/// Si7021 humidity response with a valid CRC
pub fn rh_frame(raw: u16) -> Vec<u8> {
    let [hi, lo] = raw.to_be_bytes();
    vec![hi, lo, crc8(&[hi, lo])]
}

/// Si7021 temperature response
pub fn temp_frame(raw: u16) -> Vec<u8> {
    raw.to_be_bytes().to_vec()
}
