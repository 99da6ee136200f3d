//! Shmring Core - multi-process producer/consumer over shared memory
//!
//! Producers in separate processes insert fixed-size records into a ring
//! buffer that lives in a named POSIX shared memory segment and ring a
//! capacity-1 doorbell. A single consumer waits on the doorbell and drains
//! the ring. A full ring overwrites its oldest unread record.

/// Producer and consumer loops
pub mod app;

/// Runtime configuration
pub mod config;

/// Capacity-1 wake-up channel
pub mod doorbell;

pub mod error;

/// Logging setup
pub mod logging;

/// Random record payloads
pub mod payload;

/// Shared memory ring buffer
pub mod ring;

/// Signal-driven shutdown
pub mod shutdown;

/// Sequence-gap tracking
pub mod tracker;

/// Producer worker processes
pub mod worker;

pub use error::{Result, RingError};
