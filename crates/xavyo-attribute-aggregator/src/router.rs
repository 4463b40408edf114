//! Attribute aggregator route definitions

use crate::config::AggregatorSettings;
use crate::error::{AggregatorError, AggregatorResult};
use crate::handlers::{attribute_query, AggregatorState};
use crate::models::local_sp::AuthSourceRegistry;
use crate::pipeline::{PipelineResumer, RedirectResumer, StateStore};
use crate::services::{
    AttributeQueryService, MetadataResolver, SignedResponseProcessor, SoapClient,
};
use crate::session::{CorrelationStore, InMemoryCorrelationStore, PostgresCorrelationStore};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Path of the query engine entry point
pub const ATTRIBUTE_QUERY_PATH: &str = "/attributeaggregator/attributequery";

/// Create the attribute aggregator router
pub fn aggregator_router(state: AggregatorState) -> Router {
    Router::new()
        .route(ATTRIBUTE_QUERY_PATH, get(attribute_query))
        .with_state(state)
}

/// Create aggregator state from settings.
///
/// The resumed pipeline is reached through `pipeline_resume_url`. Correlation
/// records go to PostgreSQL when `DATABASE_URL` is configured.
pub fn create_aggregator_state(
    settings: &AggregatorSettings,
    states: Arc<dyn StateStore>,
    metadata: MetadataResolver,
    auth_sources: AuthSourceRegistry,
    pipeline_resume_url: String,
) -> AggregatorResult<AggregatorState> {
    let transport = Arc::new(SoapClient::new(settings.query_timeout())?);
    let resumer: Arc<dyn PipelineResumer> =
        Arc::new(RedirectResumer::new(states.clone(), pipeline_resume_url));
    let pool = settings
        .database_pool()
        .map_err(|e| AggregatorError::Internal(e.to_string()))?;
    let correlations: Arc<dyn CorrelationStore> = match pool {
        Some(pool) => Arc::new(PostgresCorrelationStore::new(pool)),
        None => Arc::new(InMemoryCorrelationStore::new()),
    };

    let service = AttributeQueryService::new(states, metadata, auth_sources, transport, resumer)
        .with_correlation_store(correlations)
        .with_response_processor(Arc::new(SignedResponseProcessor::new(
            settings.clock_skew_secs,
        )))
        .with_correlation_ttl(settings.correlation_ttl_secs);

    Ok(AggregatorState {
        service: Arc::new(service),
    })
}
