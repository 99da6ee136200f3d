//! Shared memory ring buffer for inter-process communication.
//!
//! Producers and a consumer in separate processes share a named POSIX shared
//! memory segment holding a header (robust mutex, read/write cursors) and a
//! fixed array of [`Record`]s. Access is serialized by the cross-process
//! mutex; a full ring overwrites its oldest unread record.

mod buffer;
mod header;
mod lock;
mod record;
mod segment;

pub use buffer::{RingBuffer, RingGuard};
pub use header::{Cursors, SegmentHeader, SegmentLayout};
pub use lock::{LockState, RobustMutex};
pub use record::{Record, PAYLOAD_SIZE};
pub use segment::{Role, Segment, SegmentOptions};

use std::time::Duration;

use crate::error::Result;

/// Well-known name of the shared segment.
pub const DEFAULT_SEGMENT_NAME: &str = "/mpdataaggregator";

/// Default number of records in the ring.
pub const DEFAULT_CAPACITY: usize = 10;

/// Default time a joiner waits for the creator to publish the header.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens the ring at the well-known name with the given capacity.
pub fn open_ring_buffer(capacity: usize) -> Result<RingBuffer> {
    RingBuffer::open(SegmentOptions::new(DEFAULT_SEGMENT_NAME, capacity))
}

/// Unique IPC object name for a test.
#[cfg(test)]
pub(crate) fn test_name(tag: &str) -> String {
    format!("/shmring-test-{}-{}", std::process::id(), tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doorbell::{Doorbell, Mode, Wakeup};

    fn producer_record(sequence: u64) -> Record {
        Record::new(std::process::id() as libc::pid_t, sequence, "HelloOtter")
    }

    #[test]
    fn test_end_to_end_consumer_drains_late() {
        let ring = RingBuffer::open(SegmentOptions::new(test_name("e2e-late"), 5)).unwrap();
        let doorbell = Doorbell::open(&test_name("e2e-late-bell")).unwrap();

        for seq in 0..10 {
            ring.insert(&producer_record(seq)).unwrap();
            doorbell.notify(Mode::NonBlocking).unwrap();
        }

        assert_eq!(doorbell.wait(Mode::NonBlocking).unwrap(), Wakeup::Notified);
        let seqs: Vec<u64> = ring.drain().unwrap().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_end_to_end_consumer_drains_each_notification() {
        let ring = RingBuffer::open(SegmentOptions::new(test_name("e2e-eager"), 5)).unwrap();
        let doorbell = Doorbell::open(&test_name("e2e-eager-bell")).unwrap();

        let mut seen = Vec::new();
        for seq in 0..10 {
            ring.insert(&producer_record(seq)).unwrap();
            doorbell.notify(Mode::NonBlocking).unwrap();

            assert_eq!(doorbell.wait(Mode::Blocking).unwrap(), Wakeup::Notified);
            seen.extend(ring.drain().unwrap().iter().map(|r| r.sequence));
        }
        assert_eq!(seen, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_end_to_end_across_threads() {
        let ring_name = test_name("e2e-threads");
        let bell_name = test_name("e2e-threads-bell");
        let ring = RingBuffer::open(SegmentOptions::new(ring_name.clone(), 5)).unwrap();
        let doorbell = Doorbell::open(&bell_name).unwrap();

        let producer = std::thread::spawn(move || {
            let ring = RingBuffer::open(SegmentOptions::new(ring_name, 5)).unwrap();
            let doorbell = Doorbell::open(&bell_name).unwrap();
            assert_eq!(ring.role(), Role::Joiner);
            for seq in 0..10 {
                ring.insert(&producer_record(seq)).unwrap();
                doorbell.notify(Mode::NonBlocking).unwrap();
            }
        });

        let mut seen = Vec::new();
        while seen.last() != Some(&9) {
            doorbell
                .wait_timeout(std::time::Duration::from_millis(100))
                .unwrap();
            seen.extend(ring.drain().unwrap().iter().map(|r| r.sequence));
        }
        producer.join().unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!(seen.len() >= 5);
    }
}
