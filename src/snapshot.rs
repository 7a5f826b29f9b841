// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-off of the latest measurement from the acquisition thread to readers.
//!
//! The writer marks a cycle as in progress, writes the fields one by one and
//! clears the mark. Readers wait until no cycle is in progress before copying,
//! so they never see fields from two different cycles. A cycle that is
//! abandoned before being published is rolled back. The lock is only held
//! for the flag flips and the copies, never across bus I/O.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::classifier::IndicatorState;

/// Latest set of measured values
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementSnapshot {
    /// ppm
    pub co2: u16,
    /// °C
    pub temperature: f32,
    /// percent
    pub humidity: f32,
    pub indicator: IndicatorState,
}

struct Shared {
    updating: bool,
    snapshot: MeasurementSnapshot,
}

/// Single writer, any number of readers.
pub struct SnapshotCoordinator {
    shared: Mutex<Shared>,
    published: Condvar,
}

impl Default for SnapshotCoordinator {
    fn default() -> Self {
        SnapshotCoordinator::new()
    }
}

impl SnapshotCoordinator {
    /// Zeroed snapshot with the indicator off.
    ///
    /// Starts as if a cycle were in progress: readers block until the
    /// first cycle has been published.
    pub fn new() -> Self {
        SnapshotCoordinator {
            shared: Mutex::new(Shared {
                updating: true,
                snapshot: MeasurementSnapshot::default(),
            }),
            published: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a cycle as in progress. The cycle ends with
    /// [`UpdateGuard::publish`], or is rolled back when the guard is dropped
    /// without publishing.
    pub fn begin_update(&self) -> UpdateGuard<'_> {
        let mut shared = self.lock();
        let rollback = Rollback {
            snapshot: shared.snapshot,
            updating: shared.updating,
        };
        shared.updating = true;
        UpdateGuard {
            coordinator: self,
            rollback: Some(rollback),
        }
    }

    pub fn is_updating(&self) -> bool {
        self.lock().updating
    }

    /// Waits for the cycle in progress, if any, and copies the snapshot.
    pub fn latest(&self) -> MeasurementSnapshot {
        let guard = self.lock();
        let guard = self
            .published
            .wait_while(guard, |shared| shared.updating)
            .unwrap_or_else(PoisonError::into_inner);
        guard.snapshot
    }

    /// Like [`latest`](Self::latest) but gives up after `timeout`.
    pub fn latest_timeout(&self, timeout: Duration) -> Option<MeasurementSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.updating {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            guard = self
                .published
                .wait_timeout(guard, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Some(guard.snapshot)
    }

    fn finish_update(&self, rollback: Option<Rollback>) {
        let mut shared = self.lock();
        match rollback {
            Some(previous) => {
                shared.snapshot = previous.snapshot;
                shared.updating = previous.updating;
            }
            None => shared.updating = false,
        }
        drop(shared);
        self.published.notify_all();
    }
}

/// State to restore when a cycle is abandoned
struct Rollback {
    snapshot: MeasurementSnapshot,
    updating: bool,
}

/// Write access to the snapshot for the duration of one cycle.
pub struct UpdateGuard<'a> {
    coordinator: &'a SnapshotCoordinator,
    rollback: Option<Rollback>,
}

impl UpdateGuard<'_> {
    /// Changes fields of the snapshot under the lock.
    pub fn write<F: FnOnce(&mut MeasurementSnapshot)>(&self, f: F) {
        f(&mut self.coordinator.lock().snapshot);
    }

    /// Ends the cycle and wakes waiting readers.
    pub fn publish(mut self) {
        self.rollback = None;
    }
}

impl Drop for UpdateGuard<'_> {
    // Readers blocked before the first publish stay blocked.
    fn drop(&mut self) {
        self.coordinator.finish_update(self.rollback.take());
    }
}
