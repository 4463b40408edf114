//! In-memory metadata source

use super::{AaMetadata, MetadataRecord, MetadataSource, MetadataSourceError};
use async_trait::async_trait;
use std::collections::HashMap;

/// Metadata held in memory, keyed by entity id
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataSource {
    records: HashMap<String, MetadataRecord>,
}

impl InMemoryMetadataSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata for its own entity id
    #[must_use]
    pub fn with_entity(mut self, metadata: AaMetadata) -> Self {
        self.records
            .insert(metadata.entity_id.clone(), MetadataRecord::Single(metadata));
        self
    }

    /// Register an arbitrary record under `entity_id`
    pub fn insert(&mut self, entity_id: impl Into<String>, record: MetadataRecord) {
        self.records.insert(entity_id.into(), record);
    }
}

#[async_trait]
impl MetadataSource for InMemoryMetadataSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_metadata(
        &self,
        entity_id: &str,
    ) -> Result<Option<MetadataRecord>, MetadataSourceError> {
        Ok(self.records.get(entity_id).cloned())
    }
}
