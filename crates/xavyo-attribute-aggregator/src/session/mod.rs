//! Attribute query correlation tracking

pub mod store;
pub mod types;

pub use store::{CorrelationStore, InMemoryCorrelationStore, PostgresCorrelationStore};
pub use types::{CorrelationError, CorrelationRecord, DEFAULT_CORRELATION_TTL_SECONDS};
