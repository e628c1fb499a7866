//! Mediagate Worker
//!
//! Long-polls the scanner queues, routes each delivery batch to its handler and
//! runs the stale scan sweep.

pub mod queue;
pub mod setup;
pub mod telemetry;

pub use queue::{QueueConsumer, QueueConsumerConfig};
pub use setup::{initialize_worker, load_aws_config, Worker};
pub use telemetry::init_telemetry;
