//! Sliding window of admission records.
//!
//! The window is a time-ordered list of `(timestamp, cost)` records. Every
//! decision point prunes records that have fallen out of the window, so the
//! request count and cost sum always describe the trailing `duration`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// One admitted unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRecord {
    /// Identifier of the permit that created this record.
    pub id: u64,
    pub timestamp: Instant,
    pub cost: u64,
}

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    duration: Duration,
    records: VecDeque<AdmissionRecord>,
}

impl SlidingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            records: VecDeque::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Drop every record with `timestamp <= now - duration`.
    ///
    /// Records are appended in timestamp order, so pruning only ever pops from
    /// the front.
    pub fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.duration) else {
            return;
        };
        while let Some(oldest) = self.records.front() {
            if oldest.timestamp > cutoff {
                break;
            }
            self.records.pop_front();
        }
    }

    pub fn push(&mut self, record: AdmissionRecord) {
        debug_assert!(
            self.records
                .back()
                .is_none_or(|last| last.timestamp <= record.timestamp),
            "records must be appended in timestamp order"
        );
        self.records.push_back(record);
    }

    /// Overwrite the cost of the most recent record created by permit `id`.
    ///
    /// Returns `false` if the record already left the window.
    pub fn reconcile(&mut self, id: u64, actual_cost: u64) -> bool {
        match self.records.iter_mut().rev().find(|record| record.id == id) {
            Some(record) => {
                record.cost = actual_cost;
                true
            }
            None => false,
        }
    }

    pub fn request_count(&self) -> usize {
        self.records.len()
    }

    pub fn cost_sum(&self) -> u64 {
        self.records
            .iter()
            .fold(0u64, |sum, record| sum.saturating_add(record.cost))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Time until the oldest record falls out of the window.
    ///
    /// `None` if the window is empty. A record whose expiry is past the
    /// clock's range never expires and reports `Duration::MAX`.
    pub fn until_oldest_expires(&self, now: Instant) -> Option<Duration> {
        let oldest = self.records.front()?;
        Some(match oldest.timestamp.checked_add(self.duration) {
            Some(expires_at) => expires_at.saturating_duration_since(now),
            None => Duration::MAX,
        })
    }
}
