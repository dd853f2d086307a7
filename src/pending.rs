//! Per-orientation count of downloads that are queued or in flight.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::utility::Orientation;

#[derive(Debug, Default)]
pub struct PendingLedger {
    counts: Mutex<HashMap<Orientation, usize>>,
    labels: Mutex<HashMap<Orientation, u64>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, orientation: Orientation) -> usize {
        locked(&self.counts).get(&orientation).copied().unwrap_or(0)
    }

    pub fn increment(&self, orientation: Orientation, by: usize) {
        *locked(&self.counts).entry(orientation).or_insert(0) += by;
    }

    /// Never goes below zero.
    pub fn decrement(&self, orientation: Orientation, by: usize) {
        let mut counts = locked(&self.counts);
        let slot = counts.entry(orientation).or_insert(0);
        *slot = slot.saturating_sub(by);
    }

    /// Counts `by` as pending until the returned guard is dropped.
    pub fn reserve(&self, orientation: Orientation, by: usize) -> Reservation<'_> {
        self.increment(orientation, by);
        Reservation {
            ledger: self,
            orientation,
            count: by,
        }
    }

    /// Takes over `by` slots that were counted at enqueue time.
    pub fn adopt(&self, orientation: Orientation, by: usize) -> Reservation<'_> {
        Reservation {
            ledger: self,
            orientation,
            count: by,
        }
    }

    /// Progress label for the next queued download, e.g. `portrait 3`.
    pub fn next_label(&self, orientation: Orientation) -> String {
        let mut labels = locked(&self.labels);
        let n = labels.entry(orientation).or_insert(0);
        *n += 1;
        format!("{orientation} {n}")
    }
}

/// Releases its share of the ledger on drop, so a failing or panicking
/// download still clears its pending slot.
#[must_use]
pub struct Reservation<'a> {
    ledger: &'a PendingLedger,
    orientation: Orientation,
    count: usize,
}

impl Reservation<'_> {
    /// Releases one slot early, e.g. when one download of a batch finishes.
    pub fn release_one(&mut self) {
        if self.count > 0 {
            self.count -= 1;
            self.ledger.decrement(self.orientation, 1);
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.ledger.decrement(self.orientation, self.count);
    }
}
