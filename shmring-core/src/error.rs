//! Error types for the shared ring, its lock and the doorbell.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while bootstrapping or driving the shared resources.
///
/// Only bootstrap failures and genuinely unrecoverable lock states are
/// reported here. Overwrites, owner-death recovery and interrupted waits are
/// handled where they happen and never show up as errors.
#[derive(Error, Debug)]
pub enum RingError {
    #[error("capacity must be at least one record")]
    ZeroCapacity,

    #[error("invalid resource name {0:?}: expected a leading '/', no other '/', at most 255 bytes")]
    InvalidName(String),

    #[error("failed to open shared memory object {name}: {source}")]
    SegmentOpen {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("failed to size shared memory object {name} to {len} bytes: {source}")]
    SegmentResize {
        name: String,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat shared memory object {name}: {source}")]
    SegmentStat {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to map shared memory object {name}: {source}")]
    SegmentMap {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("shared memory object {name} is {actual} bytes, capacity {capacity} needs {expected}")]
    LayoutMismatch {
        name: String,
        capacity: usize,
        expected: usize,
        actual: usize,
    },

    #[error("shared memory object {name} has an incompatible header: {reason}")]
    IncompatibleHeader { name: String, reason: String },

    #[error("shared memory object {name} was not initialized by its creator within {waited:?}")]
    InitTimeout { name: String, waited: Duration },

    #[error("shared memory object {name} kept disappearing while attaching")]
    SegmentVanished { name: String },

    #[error("{op} on the segment mutex failed: {source}")]
    Lock {
        op: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("failed to open doorbell {name}: {source}")]
    DoorbellOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("doorbell {name} has {maxmsg} slots of {msgsize} bytes, expected 1 slot")]
    DoorbellMismatch {
        name: String,
        maxmsg: i64,
        msgsize: i64,
    },

    #[error("doorbell {op} failed: {source}")]
    Doorbell {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("failed to spawn producer worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to read configuration {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RingError>;

/// Validates a POSIX IPC object name (`/name`).
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = name.len() > 1
        && name.len() <= 255
        && name.starts_with('/')
        && !name[1..].contains('/')
        && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(RingError::InvalidName(name.to_string()))
    }
}
