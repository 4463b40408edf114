//! Attribute Authority metadata and the sources it is looked up in

pub mod json_file;
pub mod mdq;
pub mod memory;

pub use json_file::JsonFileMetadataSource;
pub use mdq::MdqMetadataSource;
pub use memory::InMemoryMetadataSource;

use crate::saml::SignatureAlgorithm;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A single lookup failure in one metadata source
#[derive(Debug, Error)]
pub enum MetadataSourceError {
    #[error("Failed to read metadata: {0}")]
    Io(String),

    #[error("Failed to parse metadata: {0}")]
    Parse(String),

    #[error("Metadata query failed: {0}")]
    Http(String),
}

/// One `AttributeService` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(rename = "Binding", default)]
    pub binding: String,
    #[serde(rename = "Location", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ServiceEndpoint {
    #[must_use]
    pub fn new(binding: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            location: Some(location.into()),
        }
    }
}

/// Key published in metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataKey {
    #[serde(default = "default_true")]
    pub signing: bool,
    #[serde(default)]
    pub encryption: bool,
    /// Base64 DER certificate, optionally PEM-armored
    #[serde(rename = "X509Certificate")]
    pub certificate: String,
}

fn default_true() -> bool {
    true
}

/// Remote Attribute Authority metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AaMetadata {
    #[serde(rename = "entityid")]
    pub entity_id: String,
    /// `None` when absent or not a list
    #[serde(
        rename = "AttributeService",
        default,
        deserialize_with = "lenient_services",
        skip_serializing_if = "Option::is_none"
    )]
    pub attribute_services: Option<Vec<ServiceEndpoint>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<MetadataKey>,
    /// Signature algorithm the AA expects on queries
    #[serde(
        rename = "signature.algorithm",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signature_algorithm: Option<String>,
}

impl AaMetadata {
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute_services: None,
            keys: Vec::new(),
            signature_algorithm: None,
        }
    }

    #[must_use]
    pub fn with_attribute_service(mut self, endpoint: ServiceEndpoint) -> Self {
        self.attribute_services
            .get_or_insert_with(Vec::new)
            .push(endpoint);
        self
    }

    #[must_use]
    pub fn with_signing_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.keys.push(MetadataKey {
            signing: true,
            encryption: false,
            certificate: certificate.into(),
        });
        self
    }

    /// Certificates usable to verify signatures made by the AA
    pub fn signing_certificates(&self) -> impl Iterator<Item = &str> {
        self.keys
            .iter()
            .filter(|k| k.signing)
            .map(|k| k.certificate.as_str())
    }

    /// Signature algorithm requested by the AA, if it names a supported one
    #[must_use]
    pub fn preferred_signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        let uri = self.signature_algorithm.as_deref()?;
        match uri.parse() {
            Ok(alg) => Some(alg),
            Err(e) => {
                tracing::warn!(
                    entity_id = %self.entity_id,
                    algorithm = %uri,
                    error = %e,
                    "Ignoring unsupported signature algorithm in AA metadata"
                );
                None
            }
        }
    }
}

/// Accept anything for `AttributeService`; only a list of endpoint objects counts
fn lenient_services<'de, D>(deserializer: D) -> Result<Option<Vec<ServiceEndpoint>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Array(items) => Ok(Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        )),
        _ => Ok(None),
    }
}

/// A metadata lookup result: one entity or a list of candidate entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataRecord {
    List(Vec<AaMetadata>),
    Single(AaMetadata),
}

impl MetadataRecord {
    /// Normalize to one entity; a list resolves to its first element
    #[must_use]
    pub fn into_single(self) -> Option<AaMetadata> {
        match self {
            MetadataRecord::Single(md) => Some(md),
            MetadataRecord::List(list) => {
                if list.len() > 1 {
                    tracing::warn!(
                        entity_id = %list[0].entity_id,
                        count = list.len(),
                        "Metadata source returned several records, using the first"
                    );
                }
                list.into_iter().next()
            }
        }
    }
}

/// A place Attribute Authority metadata can be looked up in
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Look up the `attributeauthority-remote` metadata of `entity_id`
    async fn get_metadata(
        &self,
        entity_id: &str,
    ) -> Result<Option<MetadataRecord>, MetadataSourceError>;
}
