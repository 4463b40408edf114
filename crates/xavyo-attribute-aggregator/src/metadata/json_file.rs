//! Flat JSON file metadata source
//!
//! The file holds an object mapping entity ids to a metadata record, or a list
//! of records each carrying its own `entityid`. The file is read on every
//! lookup so edits are picked up without a restart.

use super::{AaMetadata, MetadataRecord, MetadataSource, MetadataSourceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
#[serde(untagged)]
enum MetadataFile {
    ByEntity(HashMap<String, MetadataRecord>),
    Entities(Vec<AaMetadata>),
}

/// Metadata read from a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileMetadataSource {
    path: PathBuf,
    name: String,
}

impl JsonFileMetadataSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("json:{}", path.display());
        Self { path, name }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetadataSource for JsonFileMetadataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_metadata(
        &self,
        entity_id: &str,
    ) -> Result<Option<MetadataRecord>, MetadataSourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| MetadataSourceError::Io(format!("{}: {e}", self.path.display())))?;

        let file: MetadataFile = serde_json::from_str(&raw)
            .map_err(|e| MetadataSourceError::Parse(format!("{}: {e}", self.path.display())))?;

        let record = match file {
            MetadataFile::ByEntity(mut map) => map.remove(entity_id),
            MetadataFile::Entities(list) => {
                let matching: Vec<AaMetadata> = list
                    .into_iter()
                    .filter(|md| md.entity_id == entity_id)
                    .collect();
                match matching.len() {
                    0 => None,
                    1 => matching.into_iter().next().map(MetadataRecord::Single),
                    _ => Some(MetadataRecord::List(matching)),
                }
            }
        };

        Ok(record)
    }
}
