//! Producer worker processes and their CPU placement.

pub mod affinity;
mod pool;

pub use affinity::{core_for_worker, pin_current_to_core, PinningResult};
pub use pool::{PoolReport, WorkerPool};
