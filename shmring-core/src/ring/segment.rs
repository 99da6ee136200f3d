//! Bootstrapping of the named shared memory segment.
//!
//! The first process to create the POSIX shared memory object becomes the
//! [`Role::Creator`]: it sizes the object, initializes the header and mutex,
//! and publishes the header magic last. Every later process is a
//! [`Role::Joiner`]: it waits until the object is sized and published,
//! validates the layout against its own capacity, and never touches the
//! header's initial state.

use std::fs::File;
use std::os::unix::io::FromRawFd;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use tracing::{debug, info, warn};

use crate::error::{validate_name, Result, RingError};
use crate::ring::header::{Cursors, SegmentHeader, SegmentLayout};
use crate::ring::lock::RobustMutex;
use crate::ring::record::Record;
use crate::ring::{DEFAULT_CAPACITY, DEFAULT_INIT_TIMEOUT, DEFAULT_SEGMENT_NAME};

/// How many times the create/open pair is retried when the object vanishes
/// between the two calls.
const ATTACH_ATTEMPTS: usize = 8;

/// Whether this process brought a named resource into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// First process to create the resource; initializes and removes it.
    Creator,

    /// Attached to a resource created by someone else.
    Joiner,
}

/// Options for creating or attaching to a segment.
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// POSIX shared memory object name, e.g. `/mpdataaggregator`.
    pub name: String,

    /// Number of records. Must match across all participants.
    pub capacity: usize,

    /// How long a joiner waits for the creator to finish initialization.
    pub init_timeout: Duration,
}

impl SegmentOptions {
    /// Options for `name` with `capacity` records and the default init timeout.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_NAME, DEFAULT_CAPACITY)
    }
}

/// A mapped view of the shared segment.
pub struct Segment {
    /// Keeps the mapping alive; unmapped on drop.
    _mmap: MmapMut,

    /// Start of the mapping.
    base: *mut u8,

    layout: SegmentLayout,
    name: String,
    role: Role,
}

// Everything behind `base` is either written once before publication or
// guarded by the header mutex.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates the named segment, or attaches to it if it already exists.
    pub fn create_or_attach(options: &SegmentOptions) -> Result<Self> {
        validate_name(&options.name)?;
        let layout = SegmentLayout::for_capacity(options.capacity)?;
        let name = options.name.as_str();

        for attempt in 0..ATTACH_ATTEMPTS {
            match shm_open(
                name,
                OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                Mode::from_bits_truncate(0o666),
            ) {
                Ok(fd) => {
                    // Safety: shm_open handed us a fresh descriptor we now own.
                    let file = unsafe { File::from_raw_fd(fd) };
                    return Self::create(file, options, layout);
                }
                Err(Errno::EEXIST) => {}
                Err(source) => {
                    return Err(RingError::SegmentOpen {
                        name: name.to_string(),
                        source,
                    })
                }
            }

            match shm_open(name, OFlag::O_RDWR, Mode::empty()) {
                Ok(fd) => {
                    let file = unsafe { File::from_raw_fd(fd) };
                    return Self::attach(file, options, layout);
                }
                Err(Errno::ENOENT) => {
                    debug!(name, attempt, "segment removed between create and open, retrying");
                }
                Err(source) => {
                    return Err(RingError::SegmentOpen {
                        name: name.to_string(),
                        source,
                    })
                }
            }
        }

        Err(RingError::SegmentVanished {
            name: name.to_string(),
        })
    }

    /// Removes a segment name, e.g. one left behind by a crashed creator.
    ///
    /// Processes that still have it mapped are unaffected.
    pub fn unlink(name: &str) -> Result<()> {
        validate_name(name)?;
        shm_unlink(name).map_err(|source| RingError::SegmentOpen {
            name: name.to_string(),
            source,
        })
    }

    fn create(file: File, options: &SegmentOptions, layout: SegmentLayout) -> Result<Self> {
        info!(
            name = %options.name,
            capacity = layout.capacity,
            bytes = layout.len,
            "creating shared segment"
        );

        let created = Self::initialize(&file, options, layout);
        if created.is_err() {
            // Don't leave a half-built object behind for joiners to find.
            if let Err(e) = shm_unlink(options.name.as_str()) {
                warn!(name = %options.name, error = %e, "failed to unlink segment after error");
            }
        }
        created
    }

    fn initialize(file: &File, options: &SegmentOptions, layout: SegmentLayout) -> Result<Self> {
        file.set_len(layout.len as u64)
            .map_err(|source| RingError::SegmentResize {
                name: options.name.clone(),
                len: layout.len,
                source,
            })?;

        let mut mmap = Self::map(file, &options.name, layout)?;
        let base = mmap.as_mut_ptr();
        let header = base as *mut SegmentHeader;

        unsafe {
            ptr::addr_of_mut!((*header).version).write(SegmentHeader::VERSION);
            ptr::addr_of_mut!((*header).record_size).write(layout.record_size as u32);
            ptr::addr_of_mut!((*header).capacity).write(layout.capacity as u64);
            ptr::addr_of_mut!((*header).dropped).write(0);
            SegmentHeader::store_cursors(header, Cursors::default());
            RobustMutex::init(ptr::addr_of_mut!((*header).mutex))?;
            SegmentHeader::publish(header);
        }

        Ok(Self {
            _mmap: mmap,
            base,
            layout,
            name: options.name.clone(),
            role: Role::Creator,
        })
    }

    fn attach(file: File, options: &SegmentOptions, layout: SegmentLayout) -> Result<Self> {
        let name = options.name.as_str();
        let deadline = Instant::now() + options.init_timeout;

        // The creator may not have sized the object yet.
        let backoff = Backoff::new();
        loop {
            let actual = file
                .metadata()
                .map_err(|source| RingError::SegmentStat {
                    name: name.to_string(),
                    source,
                })?
                .len() as usize;

            if actual == layout.len {
                break;
            }
            if actual != 0 {
                return Err(RingError::LayoutMismatch {
                    name: name.to_string(),
                    capacity: layout.capacity,
                    expected: layout.len,
                    actual,
                });
            }
            wait_for_creator(&backoff, deadline, options)?;
        }

        let mut mmap = Self::map(&file, name, layout)?;
        let base = mmap.as_mut_ptr();
        let header = base as *const SegmentHeader;

        let backoff = Backoff::new();
        while !unsafe { SegmentHeader::is_published(header) } {
            wait_for_creator(&backoff, deadline, options)?;
        }

        let (version, record_size, capacity) =
            unsafe { ((*header).version, (*header).record_size, (*header).capacity) };
        if version != SegmentHeader::VERSION {
            return Err(RingError::IncompatibleHeader {
                name: name.to_string(),
                reason: format!("version {version}, expected {}", SegmentHeader::VERSION),
            });
        }
        if record_size as usize != layout.record_size || capacity as usize != layout.capacity {
            return Err(RingError::IncompatibleHeader {
                name: name.to_string(),
                reason: format!(
                    "{capacity} records of {record_size} bytes, expected {} of {}",
                    layout.capacity, layout.record_size
                ),
            });
        }

        info!(name, capacity = layout.capacity, "attached to shared segment");

        Ok(Self {
            _mmap: mmap,
            base,
            layout,
            name: options.name.clone(),
            role: Role::Joiner,
        })
    }

    fn map(file: &File, name: &str, layout: SegmentLayout) -> Result<MmapMut> {
        // Safety: the object is shared by design; all access goes through the
        // header mutex or happens before publication.
        unsafe { MmapOptions::new().len(layout.len).map_mut(file) }.map_err(|source| {
            RingError::SegmentMap {
                name: name.to_string(),
                source,
            }
        })
    }

    /// Pointer to the header at the start of the segment.
    pub fn header(&self) -> *mut SegmentHeader {
        self.base as *mut SegmentHeader
    }

    /// Pointer to the record slot at `index`.
    pub fn record(&self, index: usize) -> *mut Record {
        assert!(index < self.layout.capacity, "record index out of bounds");
        unsafe {
            self.base
                .add(self.layout.record_offset + index * self.layout.record_size)
                as *mut Record
        }
    }

    /// Offsets and sizes this segment was mapped with.
    pub fn layout(&self) -> SegmentLayout {
        self.layout
    }

    /// Name of the shared memory object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the segment.
    pub fn role(&self) -> Role {
        self.role
    }
}

fn wait_for_creator(backoff: &Backoff, deadline: Instant, options: &SegmentOptions) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(RingError::InitTimeout {
            name: options.name.clone(),
            waited: options.init_timeout,
        });
    }

    if backoff.is_completed() {
        thread::sleep(Duration::from_millis(1));
    } else {
        backoff.snooze();
    }
    Ok(())
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.role == Role::Creator {
            match shm_unlink(self.name.as_str()) {
                Ok(()) => debug!(name = %self.name, "unlinked shared segment"),
                Err(e) => warn!(name = %self.name, error = %e, "failed to unlink shared segment"),
            }
        }
    }
}
