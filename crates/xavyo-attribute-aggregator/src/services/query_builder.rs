//! SAML `AttributeQuery` construction and signing

use crate::error::{AggregatorError, AggregatorResult};
use crate::metadata::AaMetadata;
use crate::models::filter_config::{AttributeNameFormat, AttributeRequestList, NameIdFormat};
use crate::models::local_sp::LocalSpConfig;
use crate::saml::{random_id, sign_enveloped, xml_escape, NS_SAML, NS_SAMLP};
use chrono::{DateTime, SecondsFormat, Utc};

/// Subject identifier sent in the query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub value: String,
    pub format: String,
    pub name_qualifier: Option<String>,
    pub sp_name_qualifier: Option<String>,
}

impl NameId {
    /// Build a `NameID`; empty qualifiers are treated as absent
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        format: NameIdFormat,
        name_qualifier: &str,
        sp_name_qualifier: &str,
    ) -> Self {
        fn non_empty(s: &str) -> Option<String> {
            (!s.is_empty()).then(|| s.to_string())
        }

        Self {
            value: value.into(),
            format: format.as_uri().to_string(),
            name_qualifier: non_empty(name_qualifier),
            sp_name_qualifier: non_empty(sp_name_qualifier),
        }
    }
}

/// One attribute requested from the AA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedAttribute {
    pub name: String,
    /// Specific values asked for; empty means all values
    pub values: Vec<String>,
}

/// An unsigned attribute query
#[derive(Debug, Clone)]
pub struct AttributeQuery {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: String,
    pub issuer: String,
    pub name_id: NameId,
    pub attributes: Vec<RequestedAttribute>,
    pub attribute_name_format: AttributeNameFormat,
    /// Correlation id carried alongside the query
    pub relay_state: String,
}

impl AttributeQuery {
    /// Serialize to a standalone `samlp:AttributeQuery` element
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);
        xml.push_str("<samlp:AttributeQuery xmlns:samlp=\"");
        xml.push_str(NS_SAMLP);
        xml.push_str("\" xmlns:saml=\"");
        xml.push_str(NS_SAML);
        xml.push_str("\" ID=\"");
        xml.push_str(&xml_escape(&self.id));
        xml.push_str("\" Version=\"2.0\" IssueInstant=\"");
        xml.push_str(
            &self
                .issue_instant
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        xml.push_str("\" Destination=\"");
        xml.push_str(&xml_escape(&self.destination));
        xml.push_str("\">");

        xml.push_str("<saml:Issuer>");
        xml.push_str(&xml_escape(&self.issuer));
        xml.push_str("</saml:Issuer>");

        xml.push_str("<saml:Subject><saml:NameID");
        if let Some(qualifier) = &self.name_id.name_qualifier {
            xml.push_str(" NameQualifier=\"");
            xml.push_str(&xml_escape(qualifier));
            xml.push('"');
        }
        if let Some(qualifier) = &self.name_id.sp_name_qualifier {
            xml.push_str(" SPNameQualifier=\"");
            xml.push_str(&xml_escape(qualifier));
            xml.push('"');
        }
        xml.push_str(" Format=\"");
        xml.push_str(&xml_escape(&self.name_id.format));
        xml.push_str("\">");
        xml.push_str(&xml_escape(&self.name_id.value));
        xml.push_str("</saml:NameID></saml:Subject>");

        let name_format = self.attribute_name_format.as_uri();
        for attribute in &self.attributes {
            xml.push_str("<saml:Attribute Name=\"");
            xml.push_str(&xml_escape(&attribute.name));
            xml.push_str("\" NameFormat=\"");
            xml.push_str(name_format);
            if attribute.values.is_empty() {
                xml.push_str("\"/>");
                continue;
            }
            xml.push_str("\">");
            for value in &attribute.values {
                xml.push_str("<saml:AttributeValue>");
                xml.push_str(&xml_escape(value));
                xml.push_str("</saml:AttributeValue>");
            }
            xml.push_str("</saml:Attribute>");
        }

        xml.push_str("</samlp:AttributeQuery>");
        xml
    }
}

/// A signed query, ready for transport.
///
/// Only `QuerySigner` can produce one, so an unsigned query never reaches the
/// wire.
#[derive(Debug, Clone)]
pub struct SignedAttributeQuery {
    id: String,
    destination: String,
    relay_state: String,
    xml: String,
}

impl SignedAttributeQuery {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub fn relay_state(&self) -> &str {
        &self.relay_state
    }

    /// Signed `samlp:AttributeQuery` element
    #[must_use]
    pub fn xml(&self) -> &str {
        &self.xml
    }
}

/// Builds attribute queries on behalf of a local service provider
pub struct QueryBuilder;

impl QueryBuilder {
    /// Build the query for `name_id`, requesting `attributes` from `destination`
    #[must_use]
    pub fn build(
        data_id: &str,
        destination: &str,
        sp: &LocalSpConfig,
        name_id: NameId,
        attributes: &AttributeRequestList,
        attribute_name_format: AttributeNameFormat,
    ) -> AttributeQuery {
        AttributeQuery {
            id: random_id(),
            issue_instant: Utc::now(),
            destination: destination.to_string(),
            issuer: sp.entity_id.clone(),
            name_id,
            attributes: attributes
                .iter()
                .map(|spec| RequestedAttribute {
                    name: spec.name.clone(),
                    values: spec.requested_values.clone().unwrap_or_default(),
                })
                .collect(),
            attribute_name_format,
            relay_state: data_id.to_string(),
        }
    }
}

/// Signs attribute queries with the local service provider's key
pub struct QuerySigner;

impl QuerySigner {
    /// Sign `query`.
    ///
    /// The AA's metadata may name the signature algorithm it expects; it takes
    /// precedence over the local default.
    pub fn sign(
        query: AttributeQuery,
        sp: &LocalSpConfig,
        aa: &AaMetadata,
    ) -> AggregatorResult<SignedAttributeQuery> {
        let credentials = sp
            .credentials
            .as_ref()
            .ok_or(AggregatorError::SigningKeyMissing)?;
        let algorithm = aa
            .preferred_signature_algorithm()
            .unwrap_or(sp.signature_algorithm);

        let xml = sign_enveloped(&query.to_xml(), &query.id, credentials, algorithm)
            .map_err(|e| AggregatorError::SigningFailed(e.to_string()))?;

        Ok(SignedAttributeQuery {
            id: query.id,
            destination: query.destination,
            relay_state: query.relay_state,
            xml,
        })
    }
}
