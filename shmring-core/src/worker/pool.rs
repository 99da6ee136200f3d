//! Fan-out and fan-in of producer worker processes.
//!
//! Each worker is a separate process with its own handles to the named ring
//! and doorbell. Shutdown is a SIGTERM broadcast followed by reaping every
//! child.

use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{Result, RingError};
use crate::shutdown::ShutdownToken;

struct Worker {
    index: usize,
    child: Child,
    status: Option<ExitStatus>,
}

impl Worker {
    fn is_running(&self) -> bool {
        self.status.is_none()
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if status.success() {
            info!(index = self.index, pid = self.child.id(), "worker exited");
        } else {
            warn!(index = self.index, pid = self.child.id(), %status, "worker failed");
        }
        self.status = Some(status);
    }
}

/// Summary returned by [`WorkerPool::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    /// Workers that have exited, successfully or not.
    pub exited: usize,
    /// Workers that exited unsuccessfully or could not be reaped.
    pub failed: usize,
}

/// A set of running worker processes.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawns `count` workers, building each command with `command_for(index)`.
    ///
    /// If one fails to start, the ones already running are terminated.
    pub fn spawn<F>(count: usize, mut command_for: F) -> Result<Self>
    where
        F: FnMut(usize) -> Command,
    {
        let mut pool = Self {
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            let child = command_for(index)
                .spawn()
                .map_err(|source| RingError::Spawn { index, source })?;
            info!(index, pid = child.id(), "spawned worker");
            pool.workers.push(Worker {
                index,
                child,
                status: None,
            });
        }

        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Process ids of all workers.
    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().map(|w| w.child.id()).collect()
    }

    /// Number of workers that have not exited yet.
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    fn reap(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.is_running()) {
            match worker.child.try_wait() {
                Ok(Some(status)) => worker.record_exit(status),
                Ok(None) => {}
                Err(e) => warn!(index = worker.index, error = %e, "failed to poll worker"),
            }
        }
    }

    /// Polls workers every `poll` until all of them exit or shutdown is requested.
    ///
    /// Returns true if every worker exited on its own.
    pub fn supervise(&mut self, token: &ShutdownToken, poll: Duration) -> bool {
        loop {
            self.reap();
            if self.running() == 0 {
                return true;
            }
            if !token.sleep(poll) {
                return false;
            }
        }
    }

    /// Sends SIGTERM to every running worker.
    pub fn terminate(&mut self) {
        self.reap();
        for worker in self.workers.iter().filter(|w| w.is_running()) {
            let pid = Pid::from_raw(worker.child.id() as i32);
            match kill(pid, Signal::SIGTERM) {
                Ok(()) => debug!(index = worker.index, %pid, "sent SIGTERM"),
                Err(e) => warn!(index = worker.index, %pid, error = %e, "failed to signal worker"),
            }
        }
    }

    /// Blocks until every worker has exited.
    pub fn wait(&mut self) -> PoolReport {
        let mut report = PoolReport::default();

        for worker in &mut self.workers {
            if worker.is_running() {
                match worker.child.wait() {
                    Ok(status) => worker.record_exit(status),
                    Err(e) => {
                        warn!(index = worker.index, error = %e, "failed to reap worker");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            report.exited += 1;
            if worker.status.map_or(false, |s| !s.success()) {
                report.failed += 1;
            }
        }

        report
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.running() > 0 {
            self.terminate();
            self.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn command(program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    }

    #[test]
    fn test_workers_exit_on_their_own() {
        let mut pool = WorkerPool::spawn(3, |_| command("true", &[])).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.pids().len(), 3);

        let token = ShutdownToken::new();
        assert!(pool.supervise(&token, Duration::from_millis(10)));
        assert_eq!(pool.running(), 0);

        let report = pool.wait();
        assert_eq!(report, PoolReport { exited: 3, failed: 0 });
    }

    #[test]
    fn test_failures_are_counted() {
        let mut pool =
            WorkerPool::spawn(2, |i| command(if i == 0 { "true" } else { "false" }, &[])).unwrap();
        let report = pool.wait();
        assert_eq!(report, PoolReport { exited: 2, failed: 1 });
    }

    #[test]
    fn test_shutdown_terminates_workers() {
        let mut pool = WorkerPool::spawn(2, |_| command("sleep", &["30"])).unwrap();

        let token = ShutdownToken::new();
        token.trigger();
        assert!(!pool.supervise(&token, Duration::from_millis(10)));

        let start = Instant::now();
        pool.terminate();
        let report = pool.wait();
        assert!(start.elapsed() < Duration::from_secs(10));
        // `sleep` has no SIGTERM handler, so both die from the signal.
        assert_eq!(report, PoolReport { exited: 2, failed: 2 });
    }

    #[test]
    fn test_spawn_failure() {
        let result = WorkerPool::spawn(2, |i| {
            if i == 0 {
                command("sleep", &["30"])
            } else {
                command("/nonexistent/shmring-worker", &[])
            }
        });
        assert!(matches!(result, Err(RingError::Spawn { index: 1, .. })));
    }

    #[test]
    fn test_drop_reaps_running_workers() {
        let pool = WorkerPool::spawn(1, |_| command("sleep", &["30"])).unwrap();
        let pid = Pid::from_raw(pool.pids()[0] as i32);
        drop(pool);
        // Reaped: the pid no longer names our child.
        assert!(kill(pid, None).is_err());
    }
}
