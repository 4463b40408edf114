//! Authentication pipeline filter
//!
//! First half of the aggregation flow. The filter records what to ask the
//! Attribute Authority in the pending state, suspends it, and tells the caller
//! where to send the user agent next.

use crate::error::{AggregatorError, AggregatorResult, ConfigError};
use crate::models::filter_config::{
    default_attribute_id, AttributeNameFormat, AttributeRequestList, FilterConfig, NameIdFormat,
};
use crate::pipeline::{AggregatorRequest, PendingAuthState, StateStore, STAGE_ATTRIBUTE_REQUEST};
use crate::services::metadata_resolver::MetadataResolver;
use tracing::instrument;

/// Result of running the filter on a pending state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Nothing to do; the pipeline continues with this state
    Continue(PendingAuthState),
    /// The state was suspended; the caller must send the user agent to
    /// `resume_url` with `params`
    Suspend {
        resume_url: String,
        params: Vec<(String, String)>,
    },
}

impl FilterOutcome {
    /// Full redirect URL for a suspension, `None` when processing continues
    pub fn redirect_url(&self) -> AggregatorResult<Option<String>> {
        match self {
            FilterOutcome::Continue(_) => Ok(None),
            FilterOutcome::Suspend { resume_url, params } => {
                let mut url = url::Url::parse(resume_url)
                    .map_err(|e| AggregatorError::Internal(format!("invalid resume URL: {e}")))?;
                url.query_pairs_mut().extend_pairs(params.iter());
                Ok(Some(url.to_string()))
            }
        }
    }
}

/// Validated attribute aggregator filter
#[derive(Debug, Clone)]
pub struct AttributeAggregatorFilter {
    entity_id: String,
    attribute_id: String,
    required: bool,
    name_id_format: NameIdFormat,
    attributes: AttributeRequestList,
    attribute_name_format: AttributeNameFormat,
    resume_url: String,
}

impl AttributeAggregatorFilter {
    /// Validate `config` and build the filter.
    ///
    /// The AA must be resolvable in `metadata`; `resume_url` is the query
    /// engine entry point.
    pub async fn new(
        config: FilterConfig,
        metadata: &MetadataResolver,
        resume_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let entity_id = config
            .entity_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingEntityId)?;
        if metadata.find(&entity_id).await.is_none() {
            return Err(ConfigError::UnknownEntityId(entity_id));
        }

        let name_id_format = config
            .name_id_format
            .as_deref()
            .filter(|format| !format.is_empty())
            .map(str::parse::<NameIdFormat>)
            .transpose()?
            .unwrap_or_default();
        let attribute_name_format = config
            .attribute_name_format
            .as_deref()
            .filter(|format| !format.is_empty())
            .map(str::parse::<AttributeNameFormat>)
            .transpose()?
            .unwrap_or_default();
        let attributes = AttributeRequestList::from_entries(&config.attributes)?;

        Ok(Self {
            entity_id,
            attribute_id: config.attribute_id.unwrap_or_else(default_attribute_id),
            required: config.required.unwrap_or(false),
            name_id_format,
            attributes,
            attribute_name_format,
            resume_url: resume_url.into(),
        })
    }

    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    #[must_use]
    pub fn attribute_id(&self) -> &str {
        &self.attribute_id
    }

    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn name_id_format(&self) -> NameIdFormat {
        self.name_id_format
    }

    #[must_use]
    pub fn attributes(&self) -> &AttributeRequestList {
        &self.attributes
    }

    #[must_use]
    pub fn attribute_name_format(&self) -> AttributeNameFormat {
        self.attribute_name_format
    }

    /// Run the filter on `state`.
    ///
    /// When the subject attribute is missing and the filter is not required,
    /// the state is handed back unmodified and no query is made.
    #[instrument(skip(self, state, store), fields(entity_id = %self.entity_id))]
    pub async fn process(
        &self,
        mut state: PendingAuthState,
        store: &dyn StateStore,
    ) -> AggregatorResult<FilterOutcome> {
        let subject_values = match state.attributes.get(&self.attribute_id) {
            Some(values) if !values.is_empty() => values.clone(),
            _ if self.required => {
                return Err(AggregatorError::RequiredAttributeMissing(
                    self.attribute_id.clone(),
                ));
            }
            _ => {
                tracing::info!(
                    attribute = %self.attribute_id,
                    "Subject attribute missing, skipping attribute query"
                );
                return Ok(FilterOutcome::Continue(state));
            }
        };

        let auth_source_id = state
            .auth_source_id
            .clone()
            .ok_or_else(|| AggregatorError::InvalidState("missing saml:sp:AuthId".to_string()))?;

        state.set_aggregator_request(AggregatorRequest {
            auth_source_id,
            entity_id: self.entity_id.clone(),
            subject_values,
            name_id_format: self.name_id_format,
            attributes: self.attributes.clone(),
            attribute_name_format: self.attribute_name_format,
        });

        let state_id = store.save(&state, STAGE_ATTRIBUTE_REQUEST).await?;
        tracing::info!(state_id = %state_id, "Suspended state for attribute query");

        Ok(FilterOutcome::Suspend {
            resume_url: self.resume_url.clone(),
            params: vec![("StateId".to_string(), state_id.to_string())],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AaMetadata, InMemoryMetadataSource};
    use crate::models::filter_config::{AttributeRequestEntry, MultiSourcePolicy};
    use crate::pipeline::{InMemoryStateStore, StateId};
    use crate::saml::{Attributes, EDU_PERSON_PRINCIPAL_NAME, NAMEID_FORMAT_TRANSIENT};
    use std::sync::Arc;

    const AA: &str = "https://aa.example.org";
    const RESUME: &str = "https://sp.example.org/attributeaggregator/attributequery";

    fn resolver() -> MetadataResolver {
        let source = InMemoryMetadataSource::new().with_entity(AaMetadata::new(AA));
        MetadataResolver::default().with_source(Arc::new(source))
    }

    fn config() -> FilterConfig {
        FilterConfig {
            entity_id: Some(AA.to_string()),
            attribute_id: Some("uid".to_string()),
            attributes: vec![AttributeRequestEntry {
                name: "mail".to_string(),
                values: None,
                multi_source: Some("override".to_string()),
            }],
            ..Default::default()
        }
    }

    fn state(uid: Option<&str>) -> PendingAuthState {
        let mut attributes = Attributes::new();
        if let Some(uid) = uid {
            attributes.insert("uid".to_string(), vec![uid.to_string()]);
        }
        PendingAuthState::new(attributes, Some("default-sp".to_string()))
    }

    #[tokio::test]
    async fn test_defaults() {
        let filter = AttributeAggregatorFilter::new(
            FilterConfig {
                entity_id: Some(AA.to_string()),
                ..Default::default()
            },
            &resolver(),
            RESUME,
        )
        .await
        .unwrap();

        assert_eq!(filter.attribute_id(), EDU_PERSON_PRINCIPAL_NAME);
        assert!(!filter.required());
        assert_eq!(filter.name_id_format(), NameIdFormat::Persistent);
        assert_eq!(filter.attribute_name_format(), AttributeNameFormat::Uri);
        assert!(filter.attributes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_formats_use_defaults() {
        let mut config = config();
        config.name_id_format = Some(String::new());
        config.attribute_name_format = Some(String::new());

        let filter = AttributeAggregatorFilter::new(config, &resolver(), RESUME)
            .await
            .unwrap();
        assert_eq!(filter.name_id_format(), NameIdFormat::Persistent);
        assert_eq!(filter.attribute_name_format(), AttributeNameFormat::Uri);
    }

    #[tokio::test]
    async fn test_configuration_errors() {
        let resolver = resolver();

        let missing = FilterConfig::default();
        assert!(matches!(
            AttributeAggregatorFilter::new(missing, &resolver, RESUME).await,
            Err(ConfigError::MissingEntityId)
        ));

        let unknown = FilterConfig {
            entity_id: Some("https://unknown.example.org".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            AttributeAggregatorFilter::new(unknown, &resolver, RESUME).await,
            Err(ConfigError::UnknownEntityId(_))
        ));

        let mut bad_format = config();
        bad_format.name_id_format = Some("email".to_string());
        assert!(matches!(
            AttributeAggregatorFilter::new(bad_format, &resolver, RESUME).await,
            Err(ConfigError::InvalidNameIdFormat(_))
        ));

        let mut bad_name_format = config();
        bad_name_format.attribute_name_format = Some("uri".to_string());
        assert!(matches!(
            AttributeAggregatorFilter::new(bad_name_format, &resolver, RESUME).await,
            Err(ConfigError::InvalidAttributeNameFormat(_))
        ));

        let mut bad_policy = config();
        bad_policy.attributes[0].multi_source = Some("union".to_string());
        assert!(matches!(
            AttributeAggregatorFilter::new(bad_policy, &resolver, RESUME).await,
            Err(ConfigError::InvalidMultiSourcePolicy { .. })
        ));
    }

    #[tokio::test]
    async fn test_suspends_state() {
        let mut cfg = config();
        cfg.name_id_format = Some(NAMEID_FORMAT_TRANSIENT.to_string());
        let filter = AttributeAggregatorFilter::new(cfg, &resolver(), RESUME)
            .await
            .unwrap();
        let store = InMemoryStateStore::new();

        let outcome = filter.process(state(Some("alice")), &store).await.unwrap();
        let FilterOutcome::Suspend { resume_url, params } = &outcome else {
            panic!("expected suspension, got {outcome:?}");
        };
        assert_eq!(resume_url, RESUME);
        assert_eq!(params[0].0, "StateId");

        let redirect = outcome.redirect_url().unwrap().unwrap();
        assert!(redirect.starts_with(&format!("{RESUME}?StateId=_")));

        let saved = store
            .load(&StateId::from(params[0].1.as_str()), STAGE_ATTRIBUTE_REQUEST)
            .await
            .unwrap();
        let request = saved.aggregator_request().unwrap();
        assert_eq!(request.auth_source_id, "default-sp");
        assert_eq!(request.entity_id, AA);
        assert_eq!(request.subject_values, vec!["alice".to_string()]);
        assert_eq!(request.name_id_format, NameIdFormat::Transient);
        assert_eq!(
            request.attributes.get("mail").unwrap().multi_source_policy,
            Some(MultiSourcePolicy::Override)
        );
    }

    #[tokio::test]
    async fn test_missing_optional_subject_continues() {
        let filter = AttributeAggregatorFilter::new(config(), &resolver(), RESUME)
            .await
            .unwrap();
        let store = InMemoryStateStore::new();

        let input = state(None);
        let outcome = filter.process(input.clone(), &store).await.unwrap();
        assert_eq!(outcome, FilterOutcome::Continue(input));
        assert_eq!(outcome.redirect_url().unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_required_subject_fails() {
        let mut cfg = config();
        cfg.required = Some(true);
        let filter = AttributeAggregatorFilter::new(cfg, &resolver(), RESUME)
            .await
            .unwrap();

        let result = filter
            .process(state(None), &InMemoryStateStore::new())
            .await;
        assert!(matches!(
            result,
            Err(AggregatorError::RequiredAttributeMissing(name)) if name == "uid"
        ));
    }

    #[tokio::test]
    async fn test_missing_auth_source_is_invalid_state() {
        let filter = AttributeAggregatorFilter::new(config(), &resolver(), RESUME)
            .await
            .unwrap();
        let mut input = state(Some("alice"));
        input.auth_source_id = None;

        let result = filter.process(input, &InMemoryStateStore::new()).await;
        assert!(matches!(result, Err(AggregatorError::InvalidState(_))));
    }
}
