use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::doorbell::{Doorbell, Wakeup};
use crate::error::Result;
use crate::ring::{Record, RingBuffer};
use crate::shutdown::ShutdownToken;
use crate::tracker::{GapTracker, Observation};

/// Counters reported when a consumer loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Doorbell wake-ups consumed.
    pub wakeups: u64,
    /// Lock-and-drain passes over the ring.
    pub drains: u64,
    /// Records handed to the sink.
    pub received: u64,
    /// Records known lost to overwrites, from sequence gaps.
    pub missed: u64,
    /// Times this consumer's lock acquisition reset the ring after a dead holder.
    pub recoveries: u64,
}

/// The single consumer: waits on the doorbell and drains the ring.
pub struct Consumer {
    ring: RingBuffer,
    doorbell: Doorbell,
    poll_interval: Duration,
    tracker: GapTracker,
    stats: ConsumerStats,
}

impl Consumer {
    /// Opens the ring and the doorbell named in `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let ring = RingBuffer::open(config.segment_options())?;
        let doorbell = Doorbell::open(&config.doorbell_name)?;

        info!(
            segment = ring.name(),
            role = ?ring.role(),
            capacity = ring.capacity(),
            doorbell = %config.doorbell_name,
            "consumer attached"
        );

        Ok(Self {
            ring,
            doorbell,
            poll_interval: config.poll_interval(),
            tracker: GapTracker::new(),
            stats: ConsumerStats::default(),
        })
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Waits up to one poll interval for the doorbell, then drains the ring.
    ///
    /// The ring is drained on a timeout too, since wake-ups coalesce and a
    /// notify may race with the previous drain. Returns the number of records
    /// passed to `sink`; zero without touching the ring once shutdown is
    /// requested or the wait was interrupted.
    pub fn poll<F>(&mut self, token: &ShutdownToken, sink: &mut F) -> Result<usize>
    where
        F: FnMut(&Record),
    {
        if token.is_triggered() {
            return Ok(0);
        }

        match self.doorbell.wait_timeout(self.poll_interval)? {
            Wakeup::Interrupted => {
                debug!("doorbell wait interrupted");
                return Ok(0);
            }
            Wakeup::Notified => self.stats.wakeups += 1,
            Wakeup::TimedOut | Wakeup::Empty => {}
        }

        if token.is_triggered() {
            return Ok(0);
        }

        let records = {
            let mut guard = self.ring.lock()?;
            if guard.recovered() {
                self.stats.recoveries += 1;
            }
            guard.drain()
        };
        self.stats.drains += 1;

        for record in &records {
            match self.tracker.observe(record) {
                Observation::Gap { missed } => warn!(
                    producer = record.producer_id,
                    sequence = record.sequence,
                    missed,
                    "records lost to overwrite"
                ),
                Observation::Restarted => debug!(
                    producer = record.producer_id,
                    "producer sequence restarted"
                ),
                Observation::First | Observation::InOrder => {}
            }
            sink(record);
        }

        self.stats.received = self.tracker.received();
        self.stats.missed = self.tracker.missed();
        Ok(records.len())
    }

    /// Polls until shutdown is requested.
    pub fn run<F>(&mut self, token: &ShutdownToken, mut sink: F) -> Result<ConsumerStats>
    where
        F: FnMut(&Record),
    {
        while !token.is_triggered() {
            self.poll(token, &mut sink)?;
        }

        info!(
            received = self.stats.received,
            missed = self.stats.missed,
            producers = self.tracker.producers(),
            wakeups = self.stats.wakeups,
            "consumer stopped"
        );
        Ok(self.stats)
    }
}

/// Opens a consumer from `config` and feeds every record to `sink` until `token` fires.
pub fn run_consumer<F>(config: &Config, token: &ShutdownToken, sink: F) -> Result<ConsumerStats>
where
    F: FnMut(&Record),
{
    Consumer::open(config)?.run(token, sink)
}
