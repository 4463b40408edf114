//! Attribute aggregator error types

use crate::pipeline::StateError;
use crate::session::CorrelationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type for attribute aggregation
pub type AggregatorResult<T> = Result<T, AggregatorError>;

/// Filter configuration errors, raised at construction time only
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AA entityId is not specified in the configuration")]
    MissingEntityId,

    #[error("AA entityId ({0}) does not exist in any available metadata source")]
    UnknownEntityId(String),

    #[error("Invalid nameIdFormat: {0}")]
    InvalidNameIdFormat(String),

    #[error("Invalid attributeNameFormat: {0}")]
    InvalidAttributeNameFormat(String),

    #[error("Invalid multiSource value {value} for {attribute}; expected keep, merge or override")]
    InvalidMultiSourcePolicy { attribute: String, value: String },

    #[error("Attribute {0} is requested more than once")]
    DuplicateAttribute(String),

    #[error("Invalid format of attributes list: {0}")]
    InvalidAttributeList(String),

    #[error("Invalid local service provider configuration: {0}")]
    InvalidLocalSp(String),
}

/// Attribute aggregation errors
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The query entry point was called without a `StateId`
    #[error("Missing required StateId query parameter")]
    MissingStateId,

    /// Pending authentication state could not be loaded or saved
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Pending state lacks data the query engine needs
    #[error("Invalid pending state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The subject key attribute is absent and the filter is marked required
    #[error("This user session does not have {0}, which is required for querying the AA")]
    RequiredAttributeMissing(String),

    /// No local service provider is registered under the auth source id
    #[error("Unknown authentication source: {0}")]
    UnknownAuthSource(String),

    /// No metadata source yields the AA
    #[error("AA entityId ({0}) does not exist in any available metadata source")]
    MetadataNotFound(String),

    /// AttributeService list is absent or not a list
    #[error("AttributeService is missing or invalid in metadata for entityId: {0}")]
    EndpointMissing(String),

    /// A SOAP AttributeService exists but has no location, or none exists
    #[error("Can't find the AttributeService endpoint to send the attribute query to {0}")]
    LocationMissing(String),

    /// No usable private key for signing the query
    #[error("Unable to find private key for signing attribute request")]
    SigningKeyMissing,

    /// Signing failed with a key present
    #[error("Failed to sign attribute query: {0}")]
    SigningFailed(String),

    #[error("Correlation store error: {0}")]
    Correlation(#[from] CorrelationError),

    /// Sending the query or receiving the response failed
    #[error("Attribute query transport failed: {0}")]
    QueryTransport(String),

    #[error("Missing issuer in response")]
    MissingIssuer,

    /// Protocol-level response processing rejected the response
    #[error("Response processing failed: {0}")]
    ResponseProcessing(String),

    /// Processing succeeded but produced no assertion
    #[error("No assertion found in response from {0}")]
    NoAssertion(String),

    /// The pipeline refused to resume
    #[error("Failed to resume processing: {0}")]
    Resume(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl AggregatorError {
    /// HTTP status and stable error code for this error
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AggregatorError::MissingStateId => (StatusCode::BAD_REQUEST, "missing_state_id"),
            AggregatorError::State(StateError::NotFound(_)) => {
                (StatusCode::BAD_REQUEST, "unknown_state")
            }
            AggregatorError::State(StateError::WrongStage { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_state_stage")
            }
            AggregatorError::State(StateError::StorageError(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "state_storage_error")
            }
            AggregatorError::InvalidState(_) => (StatusCode::BAD_REQUEST, "invalid_state"),
            AggregatorError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            AggregatorError::RequiredAttributeMissing(_) => {
                (StatusCode::FORBIDDEN, "required_attribute_missing")
            }
            AggregatorError::UnknownAuthSource(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "unknown_auth_source")
            }
            AggregatorError::MetadataNotFound(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "metadata_not_found")
            }
            AggregatorError::EndpointMissing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "endpoint_missing")
            }
            AggregatorError::LocationMissing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "location_missing")
            }
            AggregatorError::SigningKeyMissing => {
                (StatusCode::INTERNAL_SERVER_ERROR, "signing_key_missing")
            }
            AggregatorError::SigningFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "signing_failed")
            }
            AggregatorError::Correlation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "correlation_error")
            }
            AggregatorError::QueryTransport(_) => (StatusCode::BAD_GATEWAY, "query_transport_error"),
            AggregatorError::MissingIssuer => (StatusCode::BAD_GATEWAY, "missing_issuer"),
            AggregatorError::ResponseProcessing(_) => {
                (StatusCode::BAD_GATEWAY, "response_processing_error")
            }
            AggregatorError::NoAssertion(_) => (StatusCode::BAD_GATEWAY, "no_assertion"),
            AggregatorError::Resume(_) => (StatusCode::INTERNAL_SERVER_ERROR, "resume_failed"),
            AggregatorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Whether the caller, not the server, is at fault
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_and_code().0.is_client_error()
    }
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let message = match &self {
            AggregatorError::Internal(msg) => {
                tracing::error!("Attribute aggregator internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            AggregatorError::State(StateError::StorageError(msg)) => {
                tracing::error!("Attribute aggregator state storage error: {}", msg);
                "A state storage error occurred".to_string()
            }
            AggregatorError::Correlation(e) => {
                tracing::error!("Attribute aggregator correlation store error: {}", e);
                "A correlation storage error occurred".to_string()
            }
            AggregatorError::Config(e) => {
                tracing::error!("Attribute aggregator configuration error: {}", e);
                "The attribute aggregator is misconfigured".to_string()
            }
            AggregatorError::SigningFailed(e) => {
                tracing::error!("Attribute query signing failed: {}", e);
                "Failed to sign attribute query".to_string()
            }
            AggregatorError::QueryTransport(e) => {
                tracing::error!("Attribute query transport failed: {}", e);
                "The Attribute Authority could not be reached".to_string()
            }
            AggregatorError::ResponseProcessing(e) => {
                tracing::error!("Attribute query response rejected: {}", e);
                "The Attribute Authority response was rejected".to_string()
            }
            AggregatorError::Resume(e) => {
                tracing::error!("Failed to resume authentication processing: {}", e);
                "Failed to resume authentication".to_string()
            }
            // Safe user-facing messages (only configured entity ids and attribute names)
            AggregatorError::MissingStateId
            | AggregatorError::State(_)
            | AggregatorError::InvalidState(_)
            | AggregatorError::RequiredAttributeMissing(_)
            | AggregatorError::UnknownAuthSource(_)
            | AggregatorError::MetadataNotFound(_)
            | AggregatorError::EndpointMissing(_)
            | AggregatorError::LocationMissing(_)
            | AggregatorError::SigningKeyMissing
            | AggregatorError::MissingIssuer
            | AggregatorError::NoAssertion(_) => self.to_string(),
        };

        let body = ErrorResponse {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
