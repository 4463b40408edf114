//! Attribute Authority metadata resolution across ordered sources

use crate::error::{AggregatorError, AggregatorResult};
use crate::metadata::{AaMetadata, MetadataSource};
use std::sync::Arc;
use tracing::instrument;

/// Looks up AA metadata in an ordered list of sources.
///
/// The first source that knows the entity wins. A source that fails is
/// logged and skipped.
#[derive(Clone, Default)]
pub struct MetadataResolver {
    sources: Vec<Arc<dyn MetadataSource>>,
}

impl MetadataResolver {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn MetadataSource>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Find the metadata of `entity_id`, or `None` if no source has it
    #[instrument(skip(self))]
    pub async fn find(&self, entity_id: &str) -> Option<AaMetadata> {
        for source in &self.sources {
            match source.get_metadata(entity_id).await {
                Ok(Some(record)) => {
                    if let Some(metadata) = record.into_single() {
                        tracing::debug!(source = %source.name(), "Resolved AA metadata");
                        return Some(metadata);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        source = %source.name(),
                        error = %e,
                        "Metadata lookup failed"
                    );
                }
            }
        }
        None
    }

    /// Resolve the metadata of `entity_id`, failing with `MetadataNotFound`
    pub async fn resolve(&self, entity_id: &str) -> AggregatorResult<AaMetadata> {
        self.find(entity_id)
            .await
            .ok_or_else(|| AggregatorError::MetadataNotFound(entity_id.to_string()))
    }
}
