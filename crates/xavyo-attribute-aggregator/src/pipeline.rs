//! Suspended authentication pipeline state and its continuation
//!
//! The filter persists a `PendingAuthState` in a `StateStore` and hands the
//! caller a resume instruction. The query engine later loads the state by its
//! `StateId`, rewrites the attribute set and passes it to a `PipelineResumer`.

use crate::error::{AggregatorError, AggregatorResult};
use crate::models::filter_config::{AttributeNameFormat, AttributeRequestList, NameIdFormat};
use crate::saml::{random_id, Attributes};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Stage under which the filter suspends the state for the query engine
pub const STAGE_ATTRIBUTE_REQUEST: &str = "attributeaggregator:request";

/// Stage under which a resumed state is handed back to the pipeline
pub const STAGE_RESUMED: &str = "attributeaggregator:resumed";

/// Default lifetime of a suspended state
pub const DEFAULT_STATE_TTL_SECONDS: i64 = 3600;

/// Opaque identifier of a suspended pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    /// Generate a fresh random state id
    #[must_use]
    pub fn generate() -> Self {
        Self(random_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregator data stored in the pending state by the filter.
///
/// Every key is optional on the wire; `PendingAuthState::aggregator_request`
/// turns it into a complete `AggregatorRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AggregatorKeys {
    #[serde(
        rename = "attributeaggregator:authsourceId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    auth_source_id: Option<String>,
    #[serde(
        rename = "attributeaggregator:entityId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    entity_id: Option<String>,
    #[serde(
        rename = "attributeaggregator:attributeId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    subject_values: Option<Vec<String>>,
    #[serde(
        rename = "attributeaggregator:nameIdFormat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    name_id_format: Option<NameIdFormat>,
    #[serde(
        rename = "attributeaggregator:attributes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    attributes: Option<AttributeRequestList>,
    #[serde(
        rename = "attributeaggregator:attributeNameFormat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    attribute_name_format: Option<AttributeNameFormat>,
}

/// Complete aggregator request carried by a suspended state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorRequest {
    /// Local service provider the query is sent on behalf of
    pub auth_source_id: String,
    /// Attribute Authority entity id
    pub entity_id: String,
    /// Values of the subject key attribute; the first one is the `NameID`
    pub subject_values: Vec<String>,
    pub name_id_format: NameIdFormat,
    pub attributes: AttributeRequestList,
    pub attribute_name_format: AttributeNameFormat,
}

/// Authentication state owned by the surrounding pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthState {
    /// Attribute set of the authenticated principal
    #[serde(rename = "Attributes", default)]
    pub attributes: Attributes,
    /// Authentication source the principal logged in through
    #[serde(rename = "saml:sp:AuthId", default, skip_serializing_if = "Option::is_none")]
    pub auth_source_id: Option<String>,
    #[serde(flatten)]
    aggregator: AggregatorKeys,
}

impl PendingAuthState {
    #[must_use]
    pub fn new(attributes: Attributes, auth_source_id: Option<String>) -> Self {
        Self {
            attributes,
            auth_source_id,
            aggregator: AggregatorKeys::default(),
        }
    }

    /// Record the aggregator request in the state
    pub fn set_aggregator_request(&mut self, request: AggregatorRequest) {
        self.aggregator = AggregatorKeys {
            auth_source_id: Some(request.auth_source_id),
            entity_id: Some(request.entity_id),
            subject_values: Some(request.subject_values),
            name_id_format: Some(request.name_id_format),
            attributes: Some(request.attributes),
            attribute_name_format: Some(request.attribute_name_format),
        };
    }

    /// Read back the aggregator request recorded by the filter
    pub fn aggregator_request(&self) -> AggregatorResult<AggregatorRequest> {
        fn missing(key: &str) -> AggregatorError {
            AggregatorError::InvalidState(format!("missing attributeaggregator:{key}"))
        }

        let keys = &self.aggregator;
        Ok(AggregatorRequest {
            auth_source_id: keys
                .auth_source_id
                .clone()
                .ok_or_else(|| missing("authsourceId"))?,
            entity_id: keys.entity_id.clone().ok_or_else(|| missing("entityId"))?,
            subject_values: keys
                .subject_values
                .clone()
                .ok_or_else(|| missing("attributeId"))?,
            name_id_format: keys.name_id_format.unwrap_or_default(),
            attributes: keys.attributes.clone().unwrap_or_default(),
            attribute_name_format: keys.attribute_name_format.unwrap_or_default(),
        })
    }
}

/// Pending state store errors
#[derive(Debug, Error, Clone)]
pub enum StateError {
    #[error("Unknown or expired state: {0}")]
    NotFound(String),

    #[error("State {state_id} is at stage {actual}, expected {expected}")]
    WrongStage {
        state_id: String,
        expected: String,
        actual: String,
    },

    #[error("State storage error: {0}")]
    StorageError(String),
}

/// Durable store for suspended authentication states
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist `state` at `stage` and return its id
    async fn save(&self, state: &PendingAuthState, stage: &str) -> Result<StateId, StateError>;

    /// Load the state saved under `id`, which must be at `stage`
    async fn load(&self, id: &StateId, stage: &str) -> Result<PendingAuthState, StateError>;

    /// Load and remove the state saved under `id`, which must be at `stage`.
    ///
    /// A state at another stage is left in place.
    async fn take(&self, id: &StateId, stage: &str) -> Result<PendingAuthState, StateError>;

    /// Drop expired states, returning how many were removed
    async fn cleanup_expired(&self) -> Result<u64, StateError>;
}

impl StoredState {
    fn check(&self, id: &StateId, stage: &str) -> Result<(), StateError> {
        if self.expires_at <= Utc::now() {
            return Err(StateError::NotFound(id.to_string()));
        }
        if self.stage != stage {
            return Err(StateError::WrongStage {
                state_id: id.to_string(),
                expected: stage.to_string(),
                actual: self.stage.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredState {
    stage: String,
    state: PendingAuthState,
    expires_at: DateTime<Utc>,
}

/// In-memory state store for testing and single-node deployments
#[derive(Debug)]
pub struct InMemoryStateStore {
    states: Arc<RwLock<HashMap<StateId, StoredState>>>,
    ttl_seconds: i64,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL_SECONDS)
    }
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            ttl_seconds,
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &PendingAuthState, stage: &str) -> Result<StateId, StateError> {
        let id = StateId::generate();
        let stored = StoredState {
            stage: stage.to_string(),
            state: state.clone(),
            expires_at: Utc::now() + Duration::seconds(self.ttl_seconds),
        };
        self.states.write().await.insert(id.clone(), stored);

        tracing::debug!(state_id = %id, stage = %stage, "Saved pending authentication state");
        Ok(id)
    }

    async fn load(&self, id: &StateId, stage: &str) -> Result<PendingAuthState, StateError> {
        let states = self.states.read().await;
        let stored = states
            .get(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        stored.check(id, stage)?;

        Ok(stored.state.clone())
    }

    async fn take(&self, id: &StateId, stage: &str) -> Result<PendingAuthState, StateError> {
        let mut states = self.states.write().await;
        let stored = states
            .get(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        stored.check(id, stage)?;

        let stored = states
            .remove(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        tracing::debug!(state_id = %id, stage = %stage, "Consumed pending authentication state");
        Ok(stored.state)
    }

    async fn cleanup_expired(&self) -> Result<u64, StateError> {
        let now = Utc::now();
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, stored| stored.expires_at > now);
        let removed = (before - states.len()) as u64;

        if removed > 0 {
            tracing::debug!(removed, "Removed expired pending authentication states");
        }
        Ok(removed)
    }
}

/// What the caller must do once the pipeline has resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineContinuation {
    /// Send the user agent to this URL
    Redirect(String),
    /// Processing finished; nothing left for the caller to do
    Completed,
}

/// Hands a mutated state back to the authentication pipeline
#[async_trait]
pub trait PipelineResumer: Send + Sync {
    async fn resume(&self, state: PendingAuthState) -> AggregatorResult<PipelineContinuation>;
}

/// Resumer that stores the finished state and redirects to the pipeline's
/// continuation endpoint with its new `StateId`
pub struct RedirectResumer {
    store: Arc<dyn StateStore>,
    resume_url: String,
}

impl RedirectResumer {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, resume_url: impl Into<String>) -> Self {
        Self {
            store,
            resume_url: resume_url.into(),
        }
    }
}

#[async_trait]
impl PipelineResumer for RedirectResumer {
    async fn resume(&self, state: PendingAuthState) -> AggregatorResult<PipelineContinuation> {
        let id = self.store.save(&state, STAGE_RESUMED).await?;
        let mut url = url::Url::parse(&self.resume_url)
            .map_err(|e| AggregatorError::Resume(format!("invalid resume URL: {e}")))?;
        url.query_pairs_mut().append_pair("StateId", id.as_str());

        tracing::debug!(state_id = %id, "Resuming authentication pipeline");
        Ok(PipelineContinuation::Redirect(url.to_string()))
    }
}
