//! Overwrite-oldest ring buffer living in the shared segment.
//!
//! All reads and writes of the ring go through a [`RingGuard`], which holds
//! the segment's robust mutex for its lifetime. A full ring never rejects an
//! insert: the oldest unread record is discarded instead, which consumers
//! can only observe as a gap in that producer's sequence numbers.

use std::marker::PhantomData;

use tracing::{error, warn};

use crate::error::Result;
use crate::ring::header::{Cursors, SegmentHeader};
use crate::ring::lock::{LockState, RobustMutex};
use crate::ring::record::Record;
use crate::ring::segment::{Role, Segment, SegmentOptions};

/// Handle to the shared ring.
///
/// Every process (or thread) may open its own handle to the same name; the
/// first one becomes the creator and removes the segment when dropped.
pub struct RingBuffer {
    segment: Segment,
    mutex: RobustMutex,
}

impl RingBuffer {
    /// Creates the named ring, or attaches to an existing one.
    pub fn open(options: SegmentOptions) -> Result<Self> {
        let segment = Segment::create_or_attach(&options)?;
        // Safety: the mutex was initialized by the creator before the header
        // was published, and lives as long as `segment`.
        let mutex = unsafe {
            RobustMutex::from_raw(std::ptr::addr_of_mut!((*segment.header()).mutex))
        };

        Ok(Self { segment, mutex })
    }

    /// Locks the ring for exclusive access.
    ///
    /// If the previous holder died while holding the lock, the ring is reset
    /// to empty before this returns and [`RingGuard::recovered`] is true.
    /// Unread records are lost in that case.
    pub fn lock(&self) -> Result<RingGuard<'_>> {
        let state = self.mutex.acquire()?;
        let mut guard = RingGuard {
            ring: self,
            recovered: false,
            _not_send: PhantomData,
        };

        let header = self.segment.header();
        let capacity = self.segment.layout().capacity as u64;

        if state == LockState::OwnerDied {
            warn!(
                name = self.segment.name(),
                "previous lock holder died, resetting ring"
            );
            unsafe { SegmentHeader::store_cursors(header, Cursors::default()) };
            // On failure the guard is dropped here and the lock released.
            self.mutex.mark_consistent()?;
            guard.recovered = true;
        } else if !unsafe { SegmentHeader::cursors(header) }.is_consistent(capacity) {
            warn!(
                name = self.segment.name(),
                "ring cursors are inconsistent, resetting ring"
            );
            unsafe { SegmentHeader::store_cursors(header, Cursors::default()) };
            guard.recovered = true;
        }

        Ok(guard)
    }

    /// Locks, inserts one record and unlocks.
    pub fn insert(&self, record: &Record) -> Result<Option<Record>> {
        Ok(self.lock()?.insert(record))
    }

    /// Locks, takes every unread record and unlocks.
    pub fn drain(&self) -> Result<Vec<Record>> {
        Ok(self.lock()?.drain())
    }

    /// Number of records the ring holds.
    pub fn capacity(&self) -> usize {
        self.segment.layout().capacity
    }

    /// Whether this handle created the segment.
    pub fn role(&self) -> Role {
        self.segment.role()
    }

    /// Name of the underlying shared memory object.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}

/// Exclusive access to the ring, released on drop.
///
/// Not `Send`: a pthread mutex must be unlocked by the thread that locked it.
pub struct RingGuard<'a> {
    ring: &'a RingBuffer,
    recovered: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> RingGuard<'a> {
    /// True if acquiring this guard reset the ring after a dead holder.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    fn header(&self) -> *mut SegmentHeader {
        self.ring.segment.header()
    }

    fn capacity_u64(&self) -> u64 {
        self.ring.capacity() as u64
    }

    /// Writes `record` at the write position.
    ///
    /// When the ring is full the oldest unread record is overwritten and
    /// returned.
    pub fn insert(&mut self, record: &Record) -> Option<Record> {
        let header = self.header();
        let mut cursors = unsafe { SegmentHeader::cursors(header) };
        let (slot, overwrote) = cursors.push(self.capacity_u64());
        let target = self.ring.segment.record(slot);

        let displaced = if overwrote {
            unsafe { SegmentHeader::count_dropped(header) };
            Some(unsafe { target.read() })
        } else {
            None
        };

        unsafe {
            target.write(*record);
            SegmentHeader::store_cursors(header, cursors);
        }
        displaced
    }

    /// Takes the oldest unread record, or `None` if the ring is empty.
    pub fn read(&mut self) -> Option<Record> {
        let header = self.header();
        let mut cursors = unsafe { SegmentHeader::cursors(header) };
        let slot = cursors.pop(self.capacity_u64())?;

        let record = unsafe { self.ring.segment.record(slot).read() };
        unsafe { SegmentHeader::store_cursors(header, cursors) };
        Some(record)
    }

    /// Takes every unread record, oldest first.
    pub fn drain(&mut self) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.len());
        while let Some(record) = self.read() {
            records.push(record);
        }
        records
    }

    /// Number of unread records.
    pub fn len(&self) -> usize {
        unsafe { SegmentHeader::cursors(self.header()) }.len as usize
    }

    /// True when there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the next insert overwrites the oldest record.
    pub fn is_full(&self) -> bool {
        self.len() == self.ring.capacity()
    }

    /// Number of records the ring holds.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Records discarded by overwrites since the segment was created.
    pub fn dropped(&self) -> u64 {
        unsafe { SegmentHeader::dropped(self.header()) }
    }
}

impl Drop for RingGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.ring.mutex.release() {
            error!(name = self.ring.name(), error = %e, "failed to release ring lock");
        }
    }
}
