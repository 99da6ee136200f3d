//! Per-producer sequence tracking on the consumer side.
//!
//! Overwrites are silent in the ring itself; the only trace they leave is a
//! jump in a producer's sequence numbers. [`GapTracker`] turns those jumps
//! into counts.

use std::collections::HashMap;

use crate::ring::Record;

/// How a record relates to the previous one from the same producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First record seen from this producer.
    First,

    /// Directly follows the previous record.
    InOrder,

    /// `missed` records between this one and the previous were lost.
    Gap { missed: u64 },

    /// Sequence went backwards: the producer id was reused by a new process.
    Restarted,
}

#[derive(Debug, Default)]
pub struct GapTracker {
    last: HashMap<libc::pid_t, u64>,
    received: u64,
    missed: u64,
}

impl GapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &Record) -> Observation {
        self.received += 1;
        let previous = self.last.insert(record.producer_id, record.sequence);

        match previous {
            None => Observation::First,
            Some(prev) if record.sequence == prev.wrapping_add(1) => Observation::InOrder,
            Some(prev) if record.sequence > prev => {
                let missed = record.sequence - prev - 1;
                self.missed += missed;
                Observation::Gap { missed }
            }
            Some(_) => Observation::Restarted,
        }
    }

    /// Records observed so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Records known to be lost, summed over all producers.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Number of distinct producers seen.
    pub fn producers(&self) -> usize {
        self.last.len()
    }
}
