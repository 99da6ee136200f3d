//! Cross-process robust mutex.
//!
//! Wraps a `pthread_mutex_t` living inside the shared segment, configured as
//! process-shared and robust. When the holder dies with the mutex locked,
//! the next `acquire` still gets the lock but reports
//! [`LockState::OwnerDied`]; the caller repairs the protected data and calls
//! [`RobustMutex::mark_consistent`] before releasing.

use std::mem::MaybeUninit;

use nix::errno::Errno;

use crate::error::{Result, RingError};

/// Outcome of a successful [`RobustMutex::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The previous holder released the mutex normally.
    Consistent,

    /// The previous holder terminated while holding the mutex. The lock is
    /// held by the caller, but the protected state must be repaired.
    OwnerDied,
}

/// Handle to a robust, process-shared mutex in shared memory.
pub struct RobustMutex {
    raw: *mut libc::pthread_mutex_t,
}

fn check(op: &'static str, ret: libc::c_int) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(RingError::Lock {
            op,
            source: Errno::from_i32(ret),
        })
    }
}

impl RobustMutex {
    /// Initializes the mutex at `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must point to writable shared memory that nothing else is using
    /// yet, and must stay mapped for the lifetime of the returned handle.
    pub unsafe fn init(raw: *mut libc::pthread_mutex_t) -> Result<Self> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(
            "pthread_mutexattr_init",
            libc::pthread_mutexattr_init(attr.as_mut_ptr()),
        )?;

        let configured = check(
            "pthread_mutexattr_setpshared",
            libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
        )
        .and_then(|_| {
            check(
                "pthread_mutexattr_setrobust",
                libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST),
            )
        })
        .and_then(|_| check("pthread_mutex_init", libc::pthread_mutex_init(raw, attr.as_ptr())));

        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        configured?;

        Ok(Self { raw })
    }

    /// Wraps a mutex already initialized by another process.
    ///
    /// # Safety
    ///
    /// `raw` must point to a mutex set up by [`RobustMutex::init`] and must
    /// stay mapped for the lifetime of the returned handle.
    pub unsafe fn from_raw(raw: *mut libc::pthread_mutex_t) -> Self {
        Self { raw }
    }

    /// Blocks until the mutex is held by the calling thread.
    pub fn acquire(&self) -> Result<LockState> {
        match unsafe { libc::pthread_mutex_lock(self.raw) } {
            0 => Ok(LockState::Consistent),
            libc::EOWNERDEAD => Ok(LockState::OwnerDied),
            ret => Err(RingError::Lock {
                op: "pthread_mutex_lock",
                source: Errno::from_i32(ret),
            }),
        }
    }

    /// Marks a mutex acquired with [`LockState::OwnerDied`] as usable again.
    pub fn mark_consistent(&self) -> Result<()> {
        check("pthread_mutex_consistent", unsafe {
            libc::pthread_mutex_consistent(self.raw)
        })
    }

    /// Releases the mutex. Must be called by the thread that acquired it.
    pub fn release(&self) -> Result<()> {
        check("pthread_mutex_unlock", unsafe {
            libc::pthread_mutex_unlock(self.raw)
        })
    }
}

// The mutex itself synchronizes every access made through the pointer.
unsafe impl Send for RobustMutex {}
unsafe impl Sync for RobustMutex {}
