//! Mediagate coordination store
//!
//! Tracks which scanners have reported on each staged object. The PostgreSQL
//! backend is the production store; the in-memory backend serves single-process
//! development and tests.

pub mod memory;
pub mod postgres;
pub mod setup;
pub mod traits;

pub use memory::MemoryCoordinationStore;
pub use postgres::PgCoordinationStore;
pub use setup::{create_coordination_store, setup_database};
pub use traits::{CoordinationError, CoordinationResult, CoordinationStore};
