//! Local service provider configuration
//!
//! Attribute queries are sent on behalf of the service provider the user
//! authenticated through. Each provider is registered under the id of its
//! authentication source.

use crate::error::{AggregatorError, AggregatorResult, ConfigError};
use crate::saml::{SignatureAlgorithm, SigningCredentials};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Raw local service provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpSettings {
    pub entity_id: String,
    #[serde(default)]
    pub certificate_pem: Option<String>,
    #[serde(default)]
    pub private_key_pem: Option<String>,
    /// `SignatureMethod` URI; rsa-sha256 when absent
    #[serde(default)]
    pub signature_algorithm: Option<String>,
}

/// A local service provider that can issue attribute queries
#[derive(Debug, Clone)]
pub struct LocalSpConfig {
    pub entity_id: String,
    /// Query signing key pair; queries cannot be sent without it
    pub credentials: Option<SigningCredentials>,
    pub signature_algorithm: SignatureAlgorithm,
}

impl LocalSpConfig {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, credentials: Option<SigningCredentials>) -> Self {
        Self {
            entity_id: entity_id.into(),
            credentials,
            signature_algorithm: SignatureAlgorithm::default(),
        }
    }

    #[must_use]
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    /// Validate raw settings
    pub fn from_settings(settings: LocalSpSettings) -> Result<Self, ConfigError> {
        if settings.entity_id.trim().is_empty() {
            return Err(ConfigError::InvalidLocalSp(
                "entityId must not be empty".to_string(),
            ));
        }

        let credentials = match (&settings.certificate_pem, &settings.private_key_pem) {
            (Some(cert), Some(key)) => Some(
                SigningCredentials::from_pem(cert, key)
                    .map_err(|e| ConfigError::InvalidLocalSp(e.to_string()))?,
            ),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidLocalSp(format!(
                    "{}: certificate and private key must be configured together",
                    settings.entity_id
                )));
            }
        };

        let signature_algorithm = settings
            .signature_algorithm
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: crate::saml::SigningError| ConfigError::InvalidLocalSp(e.to_string()))?
            .unwrap_or_default();

        Ok(Self {
            entity_id: settings.entity_id,
            credentials,
            signature_algorithm,
        })
    }
}

/// Local service providers by authentication source id
#[derive(Debug, Clone, Default)]
pub struct AuthSourceRegistry {
    sources: HashMap<String, Arc<LocalSpConfig>>,
}

impl AuthSourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, auth_source_id: impl Into<String>, sp: LocalSpConfig) -> Self {
        self.insert(auth_source_id, sp);
        self
    }

    pub fn insert(&mut self, auth_source_id: impl Into<String>, sp: LocalSpConfig) {
        self.sources.insert(auth_source_id.into(), Arc::new(sp));
    }

    /// Look up the service provider behind an authentication source
    pub fn get(&self, auth_source_id: &str) -> AggregatorResult<Arc<LocalSpConfig>> {
        self.sources
            .get(auth_source_id)
            .cloned()
            .ok_or_else(|| AggregatorError::UnknownAuthSource(auth_source_id.to_string()))
    }
}
