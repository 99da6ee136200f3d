//! Doorbell: a named, capacity-1 wake-up channel.
//!
//! Backed by a POSIX message queue holding at most one empty message. A
//! `notify` while a message is already pending coalesces into it, so one
//! wake-up may stand for many inserted records. Consumers must always
//! re-check the ring under its lock instead of counting notifications.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{validate_name, Result, RingError};
use crate::ring::Role;

/// Well-known name of the doorbell queue.
pub const DEFAULT_DOORBELL_NAME: &str = "/mpdataaggregatorqueue";

/// Whether a doorbell call may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Blocking,
    NonBlocking,
}

/// Outcome of [`Doorbell::notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    /// A wake-up is now pending.
    Posted,

    /// A wake-up was already pending; this one was coalesced into it.
    AlreadyPending,

    /// A blocking send was interrupted by a signal.
    Interrupted,
}

/// Outcome of [`Doorbell::wait`] and [`Doorbell::wait_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A pending wake-up was consumed.
    Notified,

    /// Non-blocking wait found nothing pending.
    Empty,

    /// The timeout elapsed with nothing pending.
    TimedOut,

    /// The wait was interrupted by a signal. Not a notification.
    Interrupted,
}

/// Handle to the named doorbell queue.
pub struct Doorbell {
    mqd: libc::mqd_t,
    name: CString,
    role: Role,
}

fn queue_attr() -> libc::mq_attr {
    // Safety: mq_attr is plain data; zero is a valid value for every field.
    let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
    attr.mq_maxmsg = 1;
    attr.mq_msgsize = 1;
    attr
}

/// Absolute CLOCK_REALTIME deadline `timeout` from now.
fn deadline(timeout: Duration) -> libc::timespec {
    let at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        + timeout;
    libc::timespec {
        tv_sec: at.as_secs() as libc::time_t,
        tv_nsec: at.subsec_nanos() as libc::c_long,
    }
}

impl Doorbell {
    /// Creates the named doorbell, or opens it if it already exists.
    pub fn open(name: &str) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| RingError::InvalidName(name.to_string()))?;
        let open_err = |source| RingError::DoorbellOpen {
            name: name.to_string(),
            source,
        };

        let mut attr = queue_attr();
        let mode: libc::mode_t = 0o666;

        let mqd = unsafe {
            libc::mq_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                mode,
                &mut attr as *mut libc::mq_attr,
            )
        };
        if mqd >= 0 {
            debug!(name, "created doorbell");
            return Ok(Self {
                mqd,
                name: c_name,
                role: Role::Creator,
            });
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(open_err(err));
        }

        let mqd = unsafe { libc::mq_open(c_name.as_ptr(), libc::O_RDWR) };
        if mqd < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }

        let doorbell = Self {
            mqd,
            name: c_name,
            role: Role::Joiner,
        };

        // A stale queue with a different shape would queue wake-ups instead
        // of coalescing them.
        let actual = doorbell.attributes()?;
        if actual.mq_maxmsg != 1 || actual.mq_msgsize < 1 {
            return Err(RingError::DoorbellMismatch {
                name: name.to_string(),
                maxmsg: actual.mq_maxmsg as i64,
                msgsize: actual.mq_msgsize as i64,
            });
        }

        debug!(name, "opened doorbell");
        Ok(doorbell)
    }

    /// Removes a doorbell name, e.g. one left behind by a crashed creator.
    pub fn unlink(name: &str) -> Result<()> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| RingError::InvalidName(name.to_string()))?;
        if unsafe { libc::mq_unlink(c_name.as_ptr()) } < 0 {
            return Err(RingError::Doorbell {
                op: "mq_unlink",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn attributes(&self) -> Result<libc::mq_attr> {
        let mut attr = queue_attr();
        if unsafe { libc::mq_getattr(self.mqd, &mut attr) } < 0 {
            return Err(RingError::Doorbell {
                op: "mq_getattr",
                source: io::Error::last_os_error(),
            });
        }
        Ok(attr)
    }

    /// Posts a wake-up unless one is already pending.
    ///
    /// In [`Mode::NonBlocking`] a full queue is reported as
    /// [`Notify::AlreadyPending`] immediately. In [`Mode::Blocking`] the call
    /// waits for the pending wake-up to be consumed first.
    pub fn notify(&self, mode: Mode) -> Result<Notify> {
        let msg = [0u8; 1];
        let ret = match mode {
            Mode::Blocking => unsafe {
                libc::mq_send(self.mqd, msg.as_ptr() as *const libc::c_char, 0, 0)
            },
            Mode::NonBlocking => {
                // Already expired: fails with ETIMEDOUT instead of blocking.
                let now = deadline(Duration::ZERO);
                unsafe {
                    libc::mq_timedsend(self.mqd, msg.as_ptr() as *const libc::c_char, 0, 0, &now)
                }
            }
        };

        if ret == 0 {
            return Ok(Notify::Posted);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ETIMEDOUT) | Some(libc::EAGAIN) => Ok(Notify::AlreadyPending),
            Some(libc::EINTR) => Ok(Notify::Interrupted),
            _ => Err(RingError::Doorbell {
                op: "mq_send",
                source: err,
            }),
        }
    }

    /// Consumes a pending wake-up.
    ///
    /// [`Mode::Blocking`] waits until one arrives or a signal interrupts the
    /// call; [`Mode::NonBlocking`] returns [`Wakeup::Empty`] right away when
    /// nothing is pending.
    pub fn wait(&self, mode: Mode) -> Result<Wakeup> {
        match mode {
            Mode::Blocking => self.receive(None),
            Mode::NonBlocking => match self.receive(Some(deadline(Duration::ZERO)))? {
                Wakeup::TimedOut => Ok(Wakeup::Empty),
                other => Ok(other),
            },
        }
    }

    /// Consumes a pending wake-up, waiting at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Wakeup> {
        self.receive(Some(deadline(timeout)))
    }

    fn receive(&self, deadline: Option<libc::timespec>) -> Result<Wakeup> {
        let mut buf = [0u8; 8];
        let ret = unsafe {
            match &deadline {
                None => libc::mq_receive(
                    self.mqd,
                    buf.as_mut_ptr() as *mut libc::c_char,
                    buf.len(),
                    ptr::null_mut(),
                ),
                Some(at) => libc::mq_timedreceive(
                    self.mqd,
                    buf.as_mut_ptr() as *mut libc::c_char,
                    buf.len(),
                    ptr::null_mut(),
                    at,
                ),
            }
        };

        if ret >= 0 {
            return Ok(Wakeup::Notified);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ETIMEDOUT) | Some(libc::EAGAIN) => Ok(Wakeup::TimedOut),
            Some(libc::EINTR) => Ok(Wakeup::Interrupted),
            _ => Err(RingError::Doorbell {
                op: "mq_receive",
                source: err,
            }),
        }
    }

    /// Number of pending wake-ups (0 or 1).
    pub fn pending(&self) -> Result<usize> {
        Ok(self.attributes()?.mq_curmsgs as usize)
    }

    /// Whether this handle created the queue.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl Drop for Doorbell {
    fn drop(&mut self) {
        unsafe {
            libc::mq_close(self.mqd);
        }
        if self.role == Role::Creator && unsafe { libc::mq_unlink(self.name.as_ptr()) } < 0 {
            warn!(
                name = ?self.name,
                error = %io::Error::last_os_error(),
                "failed to unlink doorbell"
            );
        }
    }
}
