//! Runtime configuration shared by the producer and consumer binaries.
//!
//! Values come from an optional TOML file; command-line flags override them.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::doorbell::DEFAULT_DOORBELL_NAME;
use crate::error::{validate_name, Result, RingError};
use crate::ring::{SegmentOptions, DEFAULT_CAPACITY, DEFAULT_INIT_TIMEOUT, DEFAULT_SEGMENT_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of records in the ring. Must match across all processes.
    pub capacity: usize,

    /// Shared memory object name.
    pub segment_name: String,

    /// Doorbell message queue name.
    pub doorbell_name: String,

    /// Number of producer worker processes.
    pub producers: usize,

    /// Lower bound of the pause between records, in milliseconds.
    pub interval_min_ms: u64,

    /// Upper bound of the pause between records, in milliseconds.
    pub interval_max_ms: u64,

    /// How long a joiner waits for the segment creator.
    pub init_timeout_ms: u64,

    /// How often the consumer re-checks shutdown and the ring while idle.
    pub poll_interval_ms: u64,

    /// Pin each producer worker to its own core.
    pub pin_workers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            segment_name: DEFAULT_SEGMENT_NAME.to_string(),
            doorbell_name: DEFAULT_DOORBELL_NAME.to_string(),
            producers: 1,
            interval_min_ms: 1,
            interval_max_ms: 500,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 250,
            pin_workers: false,
        }
    }
}

impl Config {
    /// Loads a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| RingError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads `path` if given, otherwise starts from the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        if self.producers == 0 {
            return Err(RingError::InvalidConfig(
                "at least one producer is required".into(),
            ));
        }
        if self.interval_min_ms > self.interval_max_ms {
            return Err(RingError::InvalidConfig(format!(
                "interval_min_ms ({}) exceeds interval_max_ms ({})",
                self.interval_min_ms, self.interval_max_ms
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(RingError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        validate_name(&self.segment_name)?;
        validate_name(&self.doorbell_name)?;
        Ok(())
    }

    pub fn segment_options(&self) -> SegmentOptions {
        SegmentOptions {
            name: self.segment_name.clone(),
            capacity: self.capacity,
            init_timeout: Duration::from_millis(self.init_timeout_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.capacity, 10);
        assert_eq!(cfg.segment_name, "/mpdataaggregator");
        assert_eq!(cfg.doorbell_name, "/mpdataaggregatorqueue");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = Config::from_toml("capacity = 5\nproducers = 3\n").unwrap();
        assert_eq!(cfg.capacity, 5);
        assert_eq!(cfg.producers, 3);
        assert_eq!(cfg.interval_max_ms, 500);
        assert_eq!(cfg.segment_options().capacity, 5);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("shmring-config-{}.toml", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "segment_name = \"/custom\"\npoll_interval_ms = 10").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.segment_name, "/custom");
        assert_eq!(cfg.poll_interval(), Duration::from_millis(10));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Config::load(Path::new("/nonexistent/shmring.toml")).unwrap_err();
        assert!(matches!(err, RingError::ConfigRead { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = Config::default();
        cfg.capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.interval_min_ms = 600;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.segment_name = "relative".into();
        assert!(cfg.validate().is_err());

        assert!(Config::from_toml("capacity = \"ten\"").is_err());
    }
}
