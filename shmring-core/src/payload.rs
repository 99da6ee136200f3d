//! Random payloads and production intervals for the demo producer.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const DICTIONARY: [&str; 10] = [
    "Hello",
    "Otter",
    "Rat",
    "Data",
    "Aggregator",
    "Process",
    "Threads",
    "Mutex",
    "Queue",
    "Lock",
];

const WORDS_PER_PAYLOAD: usize = 5;

/// Generates payload text and the pause before each record.
pub struct PayloadGenerator {
    rng: StdRng,
    min_interval_ms: u64,
    max_interval_ms: u64,
}

impl PayloadGenerator {
    /// Pauses are drawn uniformly from `[min_interval_ms, max_interval_ms]`.
    pub fn new(min_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self::with_rng(StdRng::from_entropy(), min_interval_ms, max_interval_ms)
    }

    /// Deterministic generator, for tests and reproducible runs.
    pub fn seeded(seed: u64, min_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), min_interval_ms, max_interval_ms)
    }

    fn with_rng(rng: StdRng, min_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            rng,
            min_interval_ms: min_interval_ms.min(max_interval_ms),
            max_interval_ms: max_interval_ms.max(min_interval_ms),
        }
    }

    /// Five dictionary words glued together, e.g. `MutexRatHelloLockData`.
    pub fn text(&mut self) -> String {
        (0..WORDS_PER_PAYLOAD)
            .filter_map(|_| DICTIONARY.choose(&mut self.rng).copied())
            .collect()
    }

    /// Pause before producing the next record.
    pub fn interval(&mut self) -> Duration {
        Duration::from_millis(
            self.rng
                .gen_range(self.min_interval_ms..=self.max_interval_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_uses_dictionary_words() {
        let mut gen = PayloadGenerator::seeded(7, 1, 500);
        for _ in 0..20 {
            let mut rest = gen.text();
            let mut words = 0;
            while !rest.is_empty() {
                let word = DICTIONARY
                    .iter()
                    .find(|w| rest.starts_with(**w))
                    .expect("payload made of dictionary words");
                rest = rest[word.len()..].to_string();
                words += 1;
            }
            assert_eq!(words, WORDS_PER_PAYLOAD);
        }
    }

    #[test]
    fn test_interval_within_bounds() {
        let mut gen = PayloadGenerator::seeded(1, 10, 20);
        for _ in 0..100 {
            let ms = gen.interval().as_millis() as u64;
            assert!((10..=20).contains(&ms));
        }
    }

    #[test]
    fn test_swapped_bounds_are_normalized() {
        let mut gen = PayloadGenerator::seeded(1, 30, 5);
        let ms = gen.interval().as_millis() as u64;
        assert!((5..=30).contains(&ms));
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = PayloadGenerator::seeded(99, 1, 500);
        let mut b = PayloadGenerator::seeded(99, 1, 500);
        assert_eq!(a.text(), b.text());
        assert_eq!(a.interval(), b.interval());
    }
}
