//! Attribute query engine
//!
//! Second half of the aggregation flow: loads the suspended state by its
//! `StateId`, queries the Attribute Authority over the SOAP binding, merges
//! the returned attributes and resumes the pipeline.

use crate::error::{AggregatorError, AggregatorResult};
use crate::models::local_sp::AuthSourceRegistry;
use crate::pipeline::{
    PipelineContinuation, PipelineResumer, StateId, StateStore, STAGE_ATTRIBUTE_REQUEST,
};
use crate::saml::{merge_attributes, random_id};
use crate::services::endpoint_selector::select_endpoint;
use crate::services::metadata_resolver::MetadataResolver;
use crate::services::query_builder::{NameId, QueryBuilder, QuerySigner};
use crate::services::response_parser::parse_response;
use crate::services::response_processor::{
    ensure_issuer, ProcessingContext, ResponseProcessor, SignedResponseProcessor,
};
use crate::services::transport::AttributeQueryTransport;
use crate::session::{
    CorrelationRecord, CorrelationStore, InMemoryCorrelationStore, DEFAULT_CORRELATION_TTL_SECONDS,
};
use std::sync::Arc;
use tracing::instrument;

/// Runs attribute queries for suspended authentication states
pub struct AttributeQueryService {
    states: Arc<dyn StateStore>,
    metadata: MetadataResolver,
    auth_sources: AuthSourceRegistry,
    transport: Arc<dyn AttributeQueryTransport>,
    resumer: Arc<dyn PipelineResumer>,
    correlations: Arc<dyn CorrelationStore>,
    processor: Arc<dyn ResponseProcessor>,
    correlation_ttl_seconds: i64,
}

impl AttributeQueryService {
    /// Create an engine with an in-memory correlation store and the default
    /// response processor
    #[must_use]
    pub fn new(
        states: Arc<dyn StateStore>,
        metadata: MetadataResolver,
        auth_sources: AuthSourceRegistry,
        transport: Arc<dyn AttributeQueryTransport>,
        resumer: Arc<dyn PipelineResumer>,
    ) -> Self {
        Self {
            states,
            metadata,
            auth_sources,
            transport,
            resumer,
            correlations: Arc::new(InMemoryCorrelationStore::new()),
            processor: Arc::new(SignedResponseProcessor::default()),
            correlation_ttl_seconds: DEFAULT_CORRELATION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_correlation_store(mut self, store: Arc<dyn CorrelationStore>) -> Self {
        self.correlations = store;
        self
    }

    #[must_use]
    pub fn with_response_processor(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.processor = processor;
        self
    }

    #[must_use]
    pub fn with_correlation_ttl(mut self, ttl_seconds: i64) -> Self {
        self.correlation_ttl_seconds = ttl_seconds;
        self
    }

    /// Handle one invocation of the query entry point.
    ///
    /// `state_id` is the raw `StateId` request parameter; its absence is
    /// reported before anything else is looked up.
    #[instrument(skip(self))]
    pub async fn handle(&self, state_id: Option<&str>) -> AggregatorResult<PipelineContinuation> {
        let state_id = state_id
            .filter(|id| !id.is_empty())
            .map(StateId::from)
            .ok_or(AggregatorError::MissingStateId)?;

        // Consumed here so a StateId drives at most one query
        let mut state = self.states.take(&state_id, STAGE_ATTRIBUTE_REQUEST).await?;
        let request = state.aggregator_request()?;

        tracing::info!(
            state_id = %state_id,
            entity_id = %request.entity_id,
            "Starting attribute query"
        );

        let aa = self.metadata.resolve(&request.entity_id).await?;
        let endpoint = select_endpoint(&aa)?;

        let subject = request.subject_values.first().cloned().ok_or_else(|| {
            AggregatorError::InvalidState("attributeaggregator:attributeId has no value".to_string())
        })?;
        let name_id = NameId::new(subject, request.name_id_format, "", "");
        let sp = self.auth_sources.get(&request.auth_source_id)?;

        let data_id = random_id();
        let query = QueryBuilder::build(
            &data_id,
            &endpoint,
            &sp,
            name_id.clone(),
            &request.attributes,
            request.attribute_name_format,
        );
        let signed = QuerySigner::sign(query, &sp, &aa)?;

        let mut record = CorrelationRecord::with_ttl(
            data_id.clone(),
            name_id.value.clone(),
            name_id.format.clone(),
            endpoint.clone(),
            state_id.clone(),
            self.correlation_ttl_seconds,
        );
        record.subject_qualifier = name_id.name_qualifier.clone().unwrap_or_default();
        record.subject_sp_qualifier = name_id.sp_name_qualifier.clone().unwrap_or_default();
        self.correlations.put(record).await?;

        let sent = self.transport.send(&signed).await;
        // The record is single-use whatever the outcome of the exchange
        let record = self.correlations.take(&data_id).await;
        let raw_response = sent?;
        let record = record?;
        if record.state_id != state_id {
            return Err(AggregatorError::Internal(format!(
                "Correlation {data_id} belongs to another state"
            )));
        }

        let response = parse_response(&raw_response)?;
        ensure_issuer(&response)?;

        let ctx = ProcessingContext {
            sp: &sp,
            aa: &aa,
            query_id: signed.id(),
            subject: &name_id,
            raw_response: &raw_response,
        };
        let mut assertions = self.processor.process(&ctx, response)?.into_iter();
        let assertion = assertions
            .next()
            .ok_or_else(|| AggregatorError::NoAssertion(aa.entity_id.clone()))?;
        let ignored = assertions.count();
        if ignored > 0 {
            tracing::warn!(
                entity_id = %aa.entity_id,
                ignored,
                "Response carries several assertions; using the first"
            );
        }

        tracing::info!(
            state_id = %state_id,
            entity_id = %aa.entity_id,
            returned = assertion.attributes.len(),
            "Attribute query completed"
        );

        merge_attributes(&mut state.attributes, assertion.attributes, &request.attributes);
        tracing::debug!(attributes = ?state.attributes, "Merged attribute set");

        self.resumer.resume(state).await
    }
}
