//! Producer and consumer loops built on the ring and the doorbell.

mod consumer;
mod producer;

pub use consumer::{run_consumer, Consumer, ConsumerStats};
pub use producer::{run_producer, Producer, ProducerStats};
