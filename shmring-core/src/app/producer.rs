use tracing::{debug, info, warn};

use crate::config::Config;
use crate::doorbell::{Doorbell, Mode, Notify};
use crate::error::Result;
use crate::payload::PayloadGenerator;
use crate::ring::{Record, RingBuffer};
use crate::shutdown::ShutdownToken;

/// Counters reported when a producer loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Records inserted.
    pub produced: u64,
    /// Unread records this producer pushed out of a full ring.
    pub overwritten: u64,
    /// Times this producer's lock acquisition reset the ring after a dead holder.
    pub recoveries: u64,
}

/// One producer: its handles to the ring and doorbell plus its sequence counter.
pub struct Producer {
    ring: RingBuffer,
    doorbell: Doorbell,
    id: libc::pid_t,
    sequence: u64,
    stats: ProducerStats,
}

impl Producer {
    /// Opens the ring and the doorbell named in `config`.
    ///
    /// The producer id is the calling process id.
    pub fn open(config: &Config) -> Result<Self> {
        let ring = RingBuffer::open(config.segment_options())?;
        let doorbell = Doorbell::open(&config.doorbell_name)?;
        let id = nix::unistd::getpid().as_raw();

        info!(
            producer = id,
            segment = ring.name(),
            role = ?ring.role(),
            capacity = ring.capacity(),
            "producer attached"
        );

        Ok(Self {
            ring,
            doorbell,
            id,
            sequence: 0,
            stats: ProducerStats::default(),
        })
    }

    /// Producer id stamped on every record.
    pub fn id(&self) -> libc::pid_t {
        self.id
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Inserts the next record and rings the doorbell.
    ///
    /// Returns the unread record that was overwritten, if the ring was full.
    pub fn produce(&mut self, text: &str) -> Result<Option<Record>> {
        let record = Record::new(self.id, self.sequence, text);

        let displaced = {
            let mut guard = self.ring.lock()?;
            if guard.recovered() {
                self.stats.recoveries += 1;
            }
            guard.insert(&record)
        };

        if let Some(old) = &displaced {
            self.stats.overwritten += 1;
            warn!(
                producer = old.producer_id,
                sequence = old.sequence,
                "ring full, overwrote unread record"
            );
        }

        match self.doorbell.notify(Mode::NonBlocking)? {
            Notify::Posted => debug!(sequence = record.sequence, "inserted, doorbell rung"),
            Notify::AlreadyPending => debug!(sequence = record.sequence, "inserted, doorbell pending"),
            Notify::Interrupted => debug!(sequence = record.sequence, "inserted, notify interrupted"),
        }

        self.sequence += 1;
        self.stats.produced += 1;
        Ok(displaced)
    }

    /// Produces records at random intervals until shutdown is requested.
    pub fn run(
        &mut self,
        generator: &mut PayloadGenerator,
        token: &ShutdownToken,
    ) -> Result<ProducerStats> {
        while token.sleep(generator.interval()) {
            let text = generator.text();
            self.produce(&text)?;
        }

        info!(
            producer = self.id,
            produced = self.stats.produced,
            overwritten = self.stats.overwritten,
            recoveries = self.stats.recoveries,
            "producer stopped"
        );
        Ok(self.stats)
    }
}

/// Opens a producer from `config` and runs it until `token` fires.
pub fn run_producer(config: &Config, token: &ShutdownToken) -> Result<ProducerStats> {
    let mut producer = Producer::open(config)?;
    let mut generator = PayloadGenerator::new(config.interval_min_ms, config.interval_max_ms);
    producer.run(&mut generator, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doorbell::Wakeup;
    use crate::ring::{test_name, SegmentOptions};
    use std::thread;
    use std::time::{Duration, Instant};

    fn config(tag: &str, capacity: usize) -> Config {
        Config {
            capacity,
            segment_name: test_name(tag),
            doorbell_name: test_name(&format!("{tag}-bell")),
            interval_min_ms: 1,
            interval_max_ms: 2,
            ..Config::default()
        }
    }

    #[test]
    fn test_produce_numbers_records_and_notifies() {
        let cfg = config("producer-seq", 4);
        let mut producer = Producer::open(&cfg).unwrap();
        let ring = RingBuffer::open(cfg.segment_options()).unwrap();
        let doorbell = Doorbell::open(&cfg.doorbell_name).unwrap();

        for _ in 0..3 {
            assert!(producer.produce("HelloOtter").unwrap().is_none());
        }

        assert_eq!(doorbell.pending().unwrap(), 1);
        assert_eq!(doorbell.wait(Mode::NonBlocking).unwrap(), Wakeup::Notified);

        let records = ring.drain().unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(records.iter().all(|r| r.producer_id == producer.id()));
        assert_eq!(records[0].payload_text(), "HelloOtter");
    }

    #[test]
    fn test_produce_reports_overwrites() {
        let cfg = config("producer-overwrite", 2);
        let mut producer = Producer::open(&cfg).unwrap();

        producer.produce("a").unwrap();
        producer.produce("b").unwrap();
        let displaced = producer.produce("c").unwrap().unwrap();
        assert_eq!(displaced.sequence, 0);

        assert_eq!(
            producer.stats(),
            ProducerStats {
                produced: 3,
                overwritten: 1,
                recoveries: 0,
            }
        );
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let cfg = config("producer-run", 8);
        let ring = RingBuffer::open(SegmentOptions::new(cfg.segment_name.clone(), 8)).unwrap();

        let token = ShutdownToken::new();
        let stopper = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stopper.trigger();
        });

        let start = Instant::now();
        let stats = run_producer(&cfg, &token).unwrap();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(stats.produced > 0);
        assert_eq!(ring.drain().unwrap().len() as u64, stats.produced.min(8));
    }
}
