//! Header and layout of the shared segment.
//!
//! The segment starts with a [`SegmentHeader`] followed, at
//! [`SegmentLayout::record_offset`], by `capacity` contiguous records.
//! Creator and joiners derive the same [`SegmentLayout`] from the capacity,
//! so the byte length of an existing object tells a joiner whether it was
//! sized for the same capacity.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, RingError};
use crate::ring::record::Record;

/// Header stored at the start of the shared segment.
///
/// Everything except `magic` is guarded by `mutex`. `magic` is written last by
/// the creator, with release ordering, once the rest of the header is ready.
#[repr(C)]
pub struct SegmentHeader {
    /// Set to [`SegmentHeader::MAGIC`] once initialization is complete.
    pub magic: AtomicU64,

    /// Layout version of the segment.
    pub version: u32,

    /// Size of one record in bytes, as seen by the creator.
    pub record_size: u32,

    /// Number of records in the segment.
    pub capacity: u64,

    /// Process-shared robust mutex protecting the fields below.
    pub mutex: libc::pthread_mutex_t,

    /// Position of the oldest unread record.
    pub read_index: u64,

    /// Position where the next record will be written.
    pub write_index: u64,

    /// Number of unread records.
    pub len: u64,

    /// Records discarded by the overwrite-oldest policy since creation.
    pub dropped: u64,
}

impl SegmentHeader {
    /// Magic value marking a fully initialized segment ("SHMRING1").
    pub const MAGIC: u64 = 0x53_48_4D_52_49_4E_47_31;

    /// Current layout version.
    pub const VERSION: u32 = 1;

    /// Returns true once the creator has published the header.
    ///
    /// # Safety
    ///
    /// `this` must point into a live mapping of at least `size_of::<Self>()` bytes.
    pub unsafe fn is_published(this: *const Self) -> bool {
        (*this).magic.load(Ordering::Acquire) == Self::MAGIC
    }

    /// Marks the header as initialized.
    ///
    /// # Safety
    ///
    /// Same as [`SegmentHeader::is_published`]; every other field must already be written.
    pub unsafe fn publish(this: *mut Self) {
        (*this).magic.store(Self::MAGIC, Ordering::Release);
    }

    /// Reads the ring cursors.
    ///
    /// # Safety
    ///
    /// The caller must hold the header mutex.
    pub unsafe fn cursors(this: *const Self) -> Cursors {
        Cursors {
            read: ptr::addr_of!((*this).read_index).read(),
            write: ptr::addr_of!((*this).write_index).read(),
            len: ptr::addr_of!((*this).len).read(),
        }
    }

    /// Writes the ring cursors back.
    ///
    /// # Safety
    ///
    /// The caller must hold the header mutex.
    pub unsafe fn store_cursors(this: *mut Self, cursors: Cursors) {
        ptr::addr_of_mut!((*this).read_index).write(cursors.read);
        ptr::addr_of_mut!((*this).write_index).write(cursors.write);
        ptr::addr_of_mut!((*this).len).write(cursors.len);
    }

    /// Number of records dropped so far.
    ///
    /// # Safety
    ///
    /// The caller must hold the header mutex.
    pub unsafe fn dropped(this: *const Self) -> u64 {
        ptr::addr_of!((*this).dropped).read()
    }

    /// # Safety
    ///
    /// The caller must hold the header mutex.
    pub unsafe fn count_dropped(this: *mut Self) {
        let dropped = ptr::addr_of_mut!((*this).dropped);
        dropped.write(dropped.read().wrapping_add(1));
    }
}

/// Offsets and sizes of the segment for a given capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Number of records.
    pub capacity: usize,

    /// Size of the header in bytes.
    pub header_size: usize,

    /// Offset of the first record from the start of the segment.
    pub record_offset: usize,

    /// Size of one record.
    pub record_size: usize,

    /// Total byte length of the segment.
    pub len: usize,
}

impl SegmentLayout {
    /// Computes the layout for `capacity` records.
    pub fn for_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }

        let header_size = mem::size_of::<SegmentHeader>();
        let record_align = mem::align_of::<Record>();
        let record_size = mem::size_of::<Record>();
        let record_offset = (header_size + record_align - 1) & !(record_align - 1);

        let len = capacity
            .checked_mul(record_size)
            .and_then(|records| records.checked_add(record_offset))
            .ok_or_else(|| {
                RingError::InvalidConfig(format!("capacity {capacity} does not fit in memory"))
            })?;

        Ok(Self {
            capacity,
            header_size,
            record_offset,
            record_size,
            len,
        })
    }
}

/// Read/write positions of the ring.
///
/// `len` tells a full ring apart from an empty one when `read == write`.
/// A consistent set of cursors always satisfies
/// `write == (read + len) % capacity`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursors {
    /// Slot of the oldest unread record.
    pub read: u64,
    /// Slot the next insert writes to.
    pub write: u64,
    /// Number of unread records.
    pub len: u64,
}

impl Cursors {
    /// Claims the slot for the next insert.
    ///
    /// Returns the slot index and whether the oldest unread record sat in it
    /// and is being overwritten.
    pub fn push(&mut self, capacity: u64) -> (usize, bool) {
        let slot = self.write;
        self.write = (self.write + 1) % capacity;

        let overwrote = self.len == capacity;
        if overwrote {
            self.read = (self.read + 1) % capacity;
        } else {
            self.len += 1;
        }

        (slot as usize, overwrote)
    }

    /// Takes the slot of the oldest unread record, if any.
    pub fn pop(&mut self, capacity: u64) -> Option<usize> {
        if self.len == 0 {
            return None;
        }

        let slot = self.read;
        self.read = (self.read + 1) % capacity;
        self.len -= 1;
        Some(slot as usize)
    }

    /// Checks the cursor invariant for `capacity`.
    pub fn is_consistent(&self, capacity: u64) -> bool {
        capacity > 0
            && self.read < capacity
            && self.write < capacity
            && self.len <= capacity
            && self.write == (self.read + self.len) % capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_for_capacity() {
        let layout = SegmentLayout::for_capacity(10).unwrap();
        assert_eq!(layout.capacity, 10);
        assert_eq!(layout.record_size, mem::size_of::<Record>());
        assert!(layout.record_offset >= layout.header_size);
        assert_eq!(layout.record_offset % mem::align_of::<Record>(), 0);
        assert_eq!(layout.len, layout.record_offset + 10 * layout.record_size);
    }

    #[test]
    fn test_layout_rejects_zero_and_overflow() {
        assert!(matches!(
            SegmentLayout::for_capacity(0),
            Err(RingError::ZeroCapacity)
        ));
        assert!(SegmentLayout::for_capacity(usize::MAX).is_err());
    }

    #[test]
    fn test_cursors_fill_and_overwrite() {
        let mut c = Cursors::default();
        assert_eq!(c.push(3), (0, false));
        assert_eq!(c.push(3), (1, false));
        assert_eq!(c.push(3), (2, false));
        assert_eq!(c.len, 3);
        assert_eq!(c.read, c.write);

        // Full: the next push lands on the oldest record.
        assert_eq!(c.push(3), (0, true));
        assert_eq!(c.read, 1);
        assert_eq!(c.len, 3);
        assert!(c.is_consistent(3));

        assert_eq!(c.pop(3), Some(1));
        assert_eq!(c.pop(3), Some(2));
        assert_eq!(c.pop(3), Some(0));
        assert_eq!(c.pop(3), None);
        assert!(c.is_consistent(3));
    }

    #[test]
    fn test_cursors_capacity_one() {
        let mut c = Cursors::default();
        assert_eq!(c.push(1), (0, false));
        assert_eq!(c.push(1), (0, true));
        assert_eq!(c.len, 1);
        assert_eq!(c.pop(1), Some(0));
        assert_eq!(c.pop(1), None);
    }

    #[test]
    fn test_cursors_consistency() {
        assert!(Cursors::default().is_consistent(4));
        let bad = Cursors {
            read: 1,
            write: 1,
            len: 2,
        };
        assert!(!bad.is_consistent(4));
        let out_of_range = Cursors {
            read: 9,
            write: 9,
            len: 0,
        };
        assert!(!out_of_range.is_consistent(4));
    }
}
