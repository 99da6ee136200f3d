//! Process-wide shutdown request, set from signal handlers.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::debug;

use crate::error::{Result, RingError};

/// Longest single sleep taken by [`ShutdownToken::sleep`] between checks.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation token shared by everything that loops or blocks.
///
/// Cloning shares the same flag. Checked around blocking calls, never from
/// inside them.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the token when SIGINT or SIGTERM arrives.
    ///
    /// Blocking calls in the receiving thread fail with `EINTR` instead of
    /// being restarted, so doorbell waits return [`Wakeup::Interrupted`].
    ///
    /// [`Wakeup::Interrupted`]: crate::doorbell::Wakeup::Interrupted
    pub fn install_signal_handlers(&self) -> Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.flag))
                .map_err(RingError::Signal)?;
            disable_restart(signal)?;
        }
        debug!("installed SIGINT/SIGTERM handlers");
        Ok(())
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    ///
    /// Returns false if it woke up early because of a shutdown request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Clears `SA_RESTART` on the handler currently installed for `signal`.
fn disable_restart(signal: libc::c_int) -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal, ptr::null(), &mut action) != 0 {
            return Err(RingError::Signal(io::Error::last_os_error()));
        }
        action.sa_flags &= !libc::SA_RESTART;
        if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
            return Err(RingError::Signal(io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_triggered());
        token.trigger();
        assert!(clone.is_triggered());
    }

    #[test]
    fn test_sleep_completes_without_shutdown() {
        let token = ShutdownToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_sleep_wakes_on_shutdown() {
        let token = ShutdownToken::new();
        let trigger = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_sets_token() {
        let token = ShutdownToken::new();
        token.install_signal_handlers().unwrap();
        signal_hook::low_level::raise(SIGTERM).unwrap();
        assert!(token.is_triggered());
    }

    #[test]
    fn test_handlers_do_not_restart_syscalls() {
        let token = ShutdownToken::new();
        token.install_signal_handlers().unwrap();

        for signal in [SIGINT, SIGTERM] {
            let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
            assert_eq!(
                unsafe { libc::sigaction(signal, ptr::null(), &mut action) },
                0
            );
            assert_eq!(action.sa_flags & libc::SA_RESTART, 0);
        }
    }
}
