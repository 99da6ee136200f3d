//! Fixed-size record stored in the shared ring.
//!
//! Records are plain `#[repr(C)]` values copied whole into and out of the
//! segment while the ring lock is held, so a reader never sees a partial one.

use std::borrow::Cow;
use std::fmt;

/// Size of the payload carried by every record, in bytes.
pub const PAYLOAD_SIZE: usize = 256;

/// A single record written by a producer.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Process id of the producer that wrote the record.
    pub producer_id: libc::pid_t,

    /// Per-producer sequence number, increasing by one per record.
    pub sequence: u64,

    /// Fixed-length payload. Conventionally NUL-terminated text, but a full
    /// 256-byte block without terminator is legal.
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Record {
    /// Creates a record carrying `text`.
    ///
    /// Text longer than `PAYLOAD_SIZE - 1` bytes is truncated so the
    /// terminating NUL always fits.
    pub fn new(producer_id: libc::pid_t, sequence: u64, text: &str) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        let len = text.len().min(PAYLOAD_SIZE - 1);
        payload[..len].copy_from_slice(&text.as_bytes()[..len]);

        Self {
            producer_id,
            sequence,
            payload,
        }
    }

    /// Creates a record from a raw payload block.
    pub fn from_bytes(producer_id: libc::pid_t, sequence: u64, payload: [u8; PAYLOAD_SIZE]) -> Self {
        Self {
            producer_id,
            sequence,
            payload,
        }
    }

    /// Payload bytes up to the first NUL, or the whole block if there is none.
    pub fn payload_bytes(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PAYLOAD_SIZE);
        &self.payload[..end]
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload_bytes())
    }
}

impl Default for Record {
    fn default() -> Self {
        Self {
            producer_id: 0,
            sequence: 0,
            payload: [0u8; PAYLOAD_SIZE],
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("producer_id", &self.producer_id)
            .field("sequence", &self.sequence)
            .field("payload", &self.payload_text())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_text_payload() {
        let record = Record::new(42, 7, "HelloOtterRat");
        assert_eq!(record.producer_id, 42);
        assert_eq!(record.sequence, 7);
        assert_eq!(record.payload_bytes(), b"HelloOtterRat");
        assert_eq!(record.payload_text(), "HelloOtterRat");
        assert!(record.payload[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_record_truncates_long_text() {
        let long = "x".repeat(PAYLOAD_SIZE * 2);
        let record = Record::new(1, 0, &long);
        assert_eq!(record.payload_bytes().len(), PAYLOAD_SIZE - 1);
        assert_eq!(record.payload[PAYLOAD_SIZE - 1], 0);
    }

    #[test]
    fn test_record_unterminated_block() {
        let record = Record::from_bytes(1, 0, [b'a'; PAYLOAD_SIZE]);
        assert_eq!(record.payload_bytes().len(), PAYLOAD_SIZE);
        assert_eq!(record.payload_text().len(), PAYLOAD_SIZE);
    }

    #[test]
    fn test_record_layout() {
        // pid, padding to the u64, then the payload
        assert_eq!(std::mem::size_of::<Record>(), 8 + 8 + PAYLOAD_SIZE);
        assert_eq!(std::mem::align_of::<Record>(), 8);
    }
}
