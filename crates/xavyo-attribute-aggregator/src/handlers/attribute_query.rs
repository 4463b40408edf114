//! Attribute query entry point

use crate::pipeline::PipelineContinuation;
use crate::services::AttributeQueryService;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

/// Application state for attribute aggregator handlers
#[derive(Clone)]
pub struct AggregatorState {
    pub service: Arc<AttributeQueryService>,
}

/// Query parameters for the attribute query endpoint
#[derive(Debug, Deserialize, IntoParams)]
pub struct AttributeQueryParams {
    /// Id of the suspended authentication state
    #[serde(rename = "StateId")]
    pub state_id: Option<String>,
}

/// Query the Attribute Authority for a suspended authentication and resume it
#[utoipa::path(
    get,
    path = "/attributeaggregator/attributequery",
    params(AttributeQueryParams),
    responses(
        (status = 303, description = "Redirect to the resumed authentication pipeline"),
        (status = 204, description = "Pipeline resumed, nothing left to do"),
        (status = 400, description = "Missing or unknown StateId"),
        (status = 500, description = "Metadata or signing failure"),
        (status = 502, description = "Attribute Authority exchange failed"),
    ),
    tag = "Attribute Aggregator"
)]
pub async fn attribute_query(
    State(state): State<AggregatorState>,
    Query(params): Query<AttributeQueryParams>,
) -> Response {
    match state.service.handle(params.state_id.as_deref()).await {
        Ok(PipelineContinuation::Redirect(url)) => {
            (StatusCode::SEE_OTHER, [(header::LOCATION, url)]).into_response()
        }
        Ok(PipelineContinuation::Completed) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            if e.is_client_error() {
                tracing::warn!(error = %e, "Rejected attribute query request");
            } else {
                tracing::error!(error = %e, "Attribute query failed");
            }
            e.into_response()
        }
    }
}
