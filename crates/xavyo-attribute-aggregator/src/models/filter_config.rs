//! Attribute aggregator filter configuration
//!
//! `FilterConfig` is the raw, deserializable form. It is validated once into
//! typed values (`NameIdFormat`, `AttributeNameFormat`, `AttributeRequestList`)
//! that are immutable for the lifetime of the filter.

use crate::error::ConfigError;
use crate::saml::{
    EDU_PERSON_PRINCIPAL_NAME, NAMEFORMAT_BASIC, NAMEFORMAT_UNSPECIFIED, NAMEFORMAT_URI,
    NAMEID_FORMAT_ENCRYPTED, NAMEID_FORMAT_PERSISTENT, NAMEID_FORMAT_TRANSIENT,
    NAMEID_FORMAT_UNSPECIFIED,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Raw filter configuration as written by an operator
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Entity ID of the Attribute Authority to query
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Attribute whose first value identifies the subject at the AA
    #[serde(default)]
    pub attribute_id: Option<String>,
    /// Fail the authentication when the subject attribute is missing
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub name_id_format: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeRequestEntry>,
    #[serde(default)]
    pub attribute_name_format: Option<String>,
}

/// One entry of the configured attribute request list
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRequestEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_source: Option<String>,
}

/// How a value set returned by the AA combines with an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiSourcePolicy {
    /// Replace existing values with the AA's values
    Override,
    /// Keep existing values and ignore the AA's values
    Keep,
    /// Append the AA's values after the existing ones
    Merge,
}

impl MultiSourcePolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Keep => "keep",
            Self::Merge => "merge",
        }
    }
}

impl FromStr for MultiSourcePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "override" => Ok(Self::Override),
            "keep" => Ok(Self::Keep),
            "merge" => Ok(Self::Merge),
            other => Err(other.to_string()),
        }
    }
}

/// `NameID` formats accepted for the subject identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NameIdFormat {
    Unspecified,
    #[default]
    Persistent,
    Transient,
    Encrypted,
}

impl NameIdFormat {
    #[must_use]
    pub fn as_uri(&self) -> &'static str {
        match self {
            Self::Unspecified => NAMEID_FORMAT_UNSPECIFIED,
            Self::Persistent => NAMEID_FORMAT_PERSISTENT,
            Self::Transient => NAMEID_FORMAT_TRANSIENT,
            Self::Encrypted => NAMEID_FORMAT_ENCRYPTED,
        }
    }
}

impl FromStr for NameIdFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            NAMEID_FORMAT_UNSPECIFIED => Ok(Self::Unspecified),
            NAMEID_FORMAT_PERSISTENT => Ok(Self::Persistent),
            NAMEID_FORMAT_TRANSIENT => Ok(Self::Transient),
            NAMEID_FORMAT_ENCRYPTED => Ok(Self::Encrypted),
            other => Err(ConfigError::InvalidNameIdFormat(other.to_string())),
        }
    }
}

impl TryFrom<String> for NameIdFormat {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NameIdFormat> for String {
    fn from(value: NameIdFormat) -> Self {
        value.as_uri().to_string()
    }
}

impl fmt::Display for NameIdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_uri())
    }
}

/// `NameFormat` used for the requested attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeNameFormat {
    Unspecified,
    #[default]
    Uri,
    Basic,
}

impl AttributeNameFormat {
    #[must_use]
    pub fn as_uri(&self) -> &'static str {
        match self {
            Self::Unspecified => NAMEFORMAT_UNSPECIFIED,
            Self::Uri => NAMEFORMAT_URI,
            Self::Basic => NAMEFORMAT_BASIC,
        }
    }
}

impl FromStr for AttributeNameFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            NAMEFORMAT_UNSPECIFIED => Ok(Self::Unspecified),
            NAMEFORMAT_URI => Ok(Self::Uri),
            NAMEFORMAT_BASIC => Ok(Self::Basic),
            other => Err(ConfigError::InvalidAttributeNameFormat(other.to_string())),
        }
    }
}

impl TryFrom<String> for AttributeNameFormat {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttributeNameFormat> for String {
    fn from(value: AttributeNameFormat) -> Self {
        value.as_uri().to_string()
    }
}

impl fmt::Display for AttributeNameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_uri())
    }
}

/// A validated attribute request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRequestSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_source_policy: Option<MultiSourcePolicy>,
}

/// Ordered attribute request list with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AttributeRequestSpec>", into = "Vec<AttributeRequestSpec>")]
pub struct AttributeRequestList(Vec<AttributeRequestSpec>);

impl AttributeRequestList {
    /// Build a list, rejecting empty and duplicate names
    pub fn new(entries: Vec<AttributeRequestSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::InvalidAttributeList(
                    "attribute name must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateAttribute(entry.name.clone()));
            }
        }
        Ok(Self(entries))
    }

    /// Validate raw configuration entries
    pub fn from_entries(entries: &[AttributeRequestEntry]) -> Result<Self, ConfigError> {
        let specs = entries
            .iter()
            .map(|entry| {
                let multi_source_policy = entry
                    .multi_source
                    .as_deref()
                    .map(|raw| {
                        raw.parse::<MultiSourcePolicy>().map_err(|value| {
                            ConfigError::InvalidMultiSourcePolicy {
                                attribute: entry.name.clone(),
                                value,
                            }
                        })
                    })
                    .transpose()?;
                Ok(AttributeRequestSpec {
                    name: entry.name.clone(),
                    requested_values: entry.values.clone(),
                    multi_source_policy,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Self::new(specs)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeRequestSpec> {
        self.0.iter().find(|spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRequestSpec> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl TryFrom<Vec<AttributeRequestSpec>> for AttributeRequestList {
    type Error = ConfigError;

    fn try_from(value: Vec<AttributeRequestSpec>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AttributeRequestList> for Vec<AttributeRequestSpec> {
    fn from(value: AttributeRequestList) -> Self {
        value.0
    }
}

/// Default subject key attribute (eduPersonPrincipalName)
#[must_use]
pub fn default_attribute_id() -> String {
    EDU_PERSON_PRINCIPAL_NAME.to_string()
}
