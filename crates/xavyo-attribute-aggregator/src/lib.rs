//! SAML 2.0 attribute aggregation for xavyo
//!
//! After a user authenticates, this crate queries a remote Attribute Authority
//! for additional attributes and merges them into the pending authentication:
//! - Filter step: suspends the authentication state for the query engine
//! - Query engine: metadata resolution, signed `AttributeQuery` over the SOAP
//!   binding, response validation and per-attribute merge policies
//! - Metadata sources: in-memory, JSON file and MDQ
//! - Correlation tracking of outstanding queries (in-memory or PostgreSQL)

pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod saml;
pub mod services;
pub mod session;

pub use config::{AggregatorSettings, SettingsError};
pub use error::{AggregatorError, AggregatorResult, ConfigError};
pub use filter::{AttributeAggregatorFilter, FilterOutcome};
pub use handlers::AggregatorState;
pub use metadata::{
    AaMetadata, InMemoryMetadataSource, JsonFileMetadataSource, MdqMetadataSource,
    MetadataRecord, MetadataSource,
};
pub use pipeline::{
    InMemoryStateStore, PendingAuthState, PipelineContinuation, PipelineResumer,
    RedirectResumer, StateId, StateStore,
};
pub use router::{aggregator_router, create_aggregator_state, ATTRIBUTE_QUERY_PATH};
pub use services::{AttributeQueryService, MetadataResolver};
pub use session::{
    CorrelationRecord, CorrelationStore, InMemoryCorrelationStore, PostgresCorrelationStore,
};
