//! HTTP handlers for the attribute aggregator

pub mod attribute_query;

pub use attribute_query::{attribute_query, AggregatorState, AttributeQueryParams};
