//! Update cycles: named polling intervals and the tags they own.

use std::time::{Duration, Instant};

/// A polling interval with its member tags.
///
/// A new cycle is due immediately. After each firing the next due time is `now + interval`,
/// so ticks that are missed while the loop is busy do not pile up.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCycle {
    pub id: u32,
    pub interval: Duration,
    next_due: Option<Instant>,
    /// Indices into the scheduler's tag collection, in assignment order.
    tags: Vec<usize>,
}

impl UpdateCycle {
    pub fn new(id: u32, interval: Duration) -> Self {
        Self {
            id,
            interval,
            next_due: None,
            tags: Vec::new(),
        }
    }

    pub fn assign(&mut self, tag: usize) {
        self.tags.push(tag);
    }

    pub fn tags(&self) -> &[usize] {
        &self.tags
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_none_or(|due| now >= due)
    }

    /// Fire the cycle if it is due, rescheduling it from `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.next_due = Some(now + self.interval);
        true
    }
}
