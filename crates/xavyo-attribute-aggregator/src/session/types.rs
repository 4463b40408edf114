//! Correlation records for outstanding attribute queries
//!
//! A record links an outbound query (by its relay-state `data_id`) to the
//! pending authentication state it was sent for.

use crate::pipeline::StateId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TTL for correlation records (1 hour)
pub const DEFAULT_CORRELATION_TTL_SECONDS: i64 = 3600;

/// Correlation data stored while an attribute query is outstanding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    /// Random id, also sent as the query's relay state
    pub data_id: String,
    pub subject_value: String,
    pub subject_format: String,
    /// Empty when absent
    pub subject_qualifier: String,
    /// Empty when absent
    pub subject_sp_qualifier: String,
    /// AttributeService location the query is sent to
    pub endpoint_url: String,
    pub state_id: StateId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CorrelationRecord {
    /// Create a record with the default TTL and no subject qualifiers
    #[must_use]
    pub fn new(
        data_id: String,
        subject_value: String,
        subject_format: String,
        endpoint_url: String,
        state_id: StateId,
    ) -> Self {
        Self::with_ttl(
            data_id,
            subject_value,
            subject_format,
            endpoint_url,
            state_id,
            DEFAULT_CORRELATION_TTL_SECONDS,
        )
    }

    /// Create a record with a custom TTL
    #[must_use]
    pub fn with_ttl(
        data_id: String,
        subject_value: String,
        subject_format: String,
        endpoint_url: String,
        state_id: StateId,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            data_id,
            subject_value,
            subject_format,
            subject_qualifier: String::new(),
            subject_sp_qualifier: String::new(),
            endpoint_url,
            state_id,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Correlation store errors
#[derive(Debug, Error, Clone)]
pub enum CorrelationError {
    #[error("Correlation record not found: {0}")]
    NotFound(String),

    #[error("Correlation record expired: {data_id} (expired at {expired_at})")]
    Expired {
        data_id: String,
        expired_at: DateTime<Utc>,
    },

    /// Correlation ids must be unique among outstanding queries
    #[error("Duplicate correlation id: {0}")]
    DuplicateDataId(String),

    #[error("Correlation storage error: {0}")]
    StorageError(String),
}
