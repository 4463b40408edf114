//! Correlation storage for outstanding attribute queries
//!
//! Provides both in-memory (for testing) and PostgreSQL-backed
//! correlation stores for production use.

use super::types::{CorrelationError, CorrelationRecord};
use crate::pipeline::StateId;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Correlation store trait for attribute query tracking
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Store a new correlation record
    async fn put(&self, record: CorrelationRecord) -> Result<(), CorrelationError>;

    /// Look up a record by its data id without consuming it
    async fn get(&self, data_id: &str) -> Result<Option<CorrelationRecord>, CorrelationError>;

    /// Remove and return a record atomically
    ///
    /// A record can be taken once. Expired records are removed and reported
    /// as expired.
    async fn take(&self, data_id: &str) -> Result<CorrelationRecord, CorrelationError>;

    /// Clean up expired records
    ///
    /// Returns the number of records deleted
    async fn cleanup_expired(&self) -> Result<u64, CorrelationError>;
}

/// In-memory correlation store for testing and single-node deployments
#[derive(Debug, Default)]
pub struct InMemoryCorrelationStore {
    records: Arc<RwLock<HashMap<String, CorrelationRecord>>>,
}

impl InMemoryCorrelationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, record: CorrelationRecord) -> Result<(), CorrelationError> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.data_id) {
            return Err(CorrelationError::DuplicateDataId(record.data_id));
        }

        tracing::debug!(
            data_id = %record.data_id,
            state_id = %record.state_id,
            expires_at = %record.expires_at,
            "Stored attribute query correlation"
        );
        records.insert(record.data_id.clone(), record);
        Ok(())
    }

    async fn get(&self, data_id: &str) -> Result<Option<CorrelationRecord>, CorrelationError> {
        let records = self.records.read().await;
        Ok(records.get(data_id).cloned())
    }

    async fn take(&self, data_id: &str) -> Result<CorrelationRecord, CorrelationError> {
        let mut records = self.records.write().await;
        let record = records
            .remove(data_id)
            .ok_or_else(|| CorrelationError::NotFound(data_id.to_string()))?;

        if record.is_expired() {
            return Err(CorrelationError::Expired {
                data_id: record.data_id,
                expired_at: record.expires_at,
            });
        }

        tracing::debug!(data_id = %data_id, "Attribute query correlation consumed");
        Ok(record)
    }

    async fn cleanup_expired(&self) -> Result<u64, CorrelationError> {
        let mut records = self.records.write().await;
        let before_count = records.len();

        records.retain(|_, record| !record.is_expired());

        let deleted = (before_count - records.len()) as u64;

        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired attribute query correlations");
        }

        Ok(deleted)
    }
}

/// PostgreSQL-backed correlation store for production
pub struct PostgresCorrelationStore {
    pool: PgPool,
}

impl PostgresCorrelationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(r: &PgRow) -> CorrelationRecord {
    CorrelationRecord {
        data_id: r.get("data_id"),
        subject_value: r.get("subject_value"),
        subject_format: r.get("subject_format"),
        subject_qualifier: r.get("subject_qualifier"),
        subject_sp_qualifier: r.get("subject_sp_qualifier"),
        endpoint_url: r.get("endpoint_url"),
        state_id: StateId::from(r.get::<String, _>("state_id")),
        created_at: r.get("created_at"),
        expires_at: r.get("expires_at"),
    }
}

#[async_trait]
impl CorrelationStore for PostgresCorrelationStore {
    async fn put(&self, record: CorrelationRecord) -> Result<(), CorrelationError> {
        let row = sqlx::query(
            r"
            INSERT INTO attribute_query_correlations
                (data_id, subject_value, subject_format, subject_qualifier,
                 subject_sp_qualifier, endpoint_url, state_id, created_at, expires_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (data_id) DO NOTHING
            RETURNING data_id
            ",
        )
        .bind(&record.data_id)
        .bind(&record.subject_value)
        .bind(&record.subject_format)
        .bind(&record.subject_qualifier)
        .bind(&record.subject_sp_qualifier)
        .bind(&record.endpoint_url)
        .bind(record.state_id.as_str())
        .bind(record.created_at)
        .bind(record.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CorrelationError::StorageError(e.to_string()))?;

        if row.is_none() {
            return Err(CorrelationError::DuplicateDataId(record.data_id));
        }

        tracing::debug!(
            data_id = %record.data_id,
            state_id = %record.state_id,
            expires_at = %record.expires_at,
            "Stored attribute query correlation"
        );

        Ok(())
    }

    async fn get(&self, data_id: &str) -> Result<Option<CorrelationRecord>, CorrelationError> {
        let row = sqlx::query(
            r"
            SELECT data_id, subject_value, subject_format, subject_qualifier,
                   subject_sp_qualifier, endpoint_url, state_id, created_at, expires_at
            FROM attribute_query_correlations
            WHERE data_id = $1
            ",
        )
        .bind(data_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CorrelationError::StorageError(e.to_string()))?;

        Ok(row.as_ref().map(record_from_row))
    }

    async fn take(&self, data_id: &str) -> Result<CorrelationRecord, CorrelationError> {
        let row = sqlx::query(
            r"
            DELETE FROM attribute_query_correlations
            WHERE data_id = $1
            RETURNING data_id, subject_value, subject_format, subject_qualifier,
                      subject_sp_qualifier, endpoint_url, state_id, created_at, expires_at
            ",
        )
        .bind(data_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CorrelationError::StorageError(e.to_string()))?;

        let record = row
            .as_ref()
            .map(record_from_row)
            .ok_or_else(|| CorrelationError::NotFound(data_id.to_string()))?;

        if record.is_expired() {
            tracing::warn!(
                data_id = %data_id,
                expires_at = %record.expires_at,
                "Expired attribute query correlation"
            );
            return Err(CorrelationError::Expired {
                data_id: record.data_id,
                expired_at: record.expires_at,
            });
        }

        tracing::debug!(data_id = %data_id, "Attribute query correlation consumed");
        Ok(record)
    }

    async fn cleanup_expired(&self) -> Result<u64, CorrelationError> {
        let result = sqlx::query(
            r"
            DELETE FROM attribute_query_correlations
            WHERE expires_at < NOW()
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CorrelationError::StorageError(e.to_string()))?;

        let deleted = result.rows_affected();

        if deleted > 0 {
            tracing::info!(
                deleted = deleted,
                "Cleaned up expired attribute query correlations"
            );
        }

        Ok(deleted)
    }
}
