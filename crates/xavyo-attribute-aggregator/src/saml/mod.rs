//! SAML-specific utilities

pub mod attributes;
pub mod dsig;
pub mod signing;

pub use attributes::{merge_attributes, Attributes, ReturnedAttributes};
pub use dsig::{canonicalize_xml, sign_enveloped, verify_element, verify_enveloped, xml_escape};
pub use signing::{parse_certificate, SignatureAlgorithm, SigningCredentials, SigningError};

use rand::RngCore;

/// SAML 2.0 protocol namespace
pub const NS_SAMLP: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// SAML 2.0 assertion namespace
pub const NS_SAML: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// XML-DSig namespace
pub const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// SOAP 1.1 envelope namespace
pub const NS_SOAP_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SAML SOAP binding, the synchronous binding used for attribute queries
pub const BINDING_SOAP: &str = "urn:oasis:names:tc:SAML:2.0:bindings:SOAP";

/// Top-level success status code
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

pub const NAMEID_FORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
pub const NAMEID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";
pub const NAMEID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";
pub const NAMEID_FORMAT_ENCRYPTED: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:encrypted";

pub const NAMEFORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:unspecified";
pub const NAMEFORMAT_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";
pub const NAMEFORMAT_BASIC: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:basic";

/// eduPersonPrincipalName, the default subject key attribute
pub const EDU_PERSON_PRINCIPAL_NAME: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.6";

/// Generate a random SAML identifier: `_` followed by 40 hex characters.
///
/// Used for message IDs, correlation ids and pending state ids. The leading
/// underscore keeps the value a valid `xs:ID`.
#[must_use]
pub fn random_id() -> String {
    let mut bytes = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("_{}", hex::encode(bytes))
}
