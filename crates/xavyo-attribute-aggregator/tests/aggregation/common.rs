//! Common test utilities for attribute aggregation tests
//!
//! Provides generated signing keys, a mock Attribute Authority that answers
//! attribute queries with signed responses, and metadata fixtures.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use xavyo_attribute_aggregator::metadata::ServiceEndpoint;
use xavyo_attribute_aggregator::saml::{
    sign_enveloped, SignatureAlgorithm, SigningCredentials, BINDING_SOAP, NS_SAML, NS_SAMLP,
    NS_SOAP_ENV, STATUS_SUCCESS,
};
use xavyo_attribute_aggregator::AaMetadata;

pub const AA_ENTITY_ID: &str = "https://aa.example.org";
pub const SP_ENTITY_ID: &str = "https://sp.example.org";
pub const SOAP_PATH: &str = "/aa/soap";

// ============================================================================
// Keys
// ============================================================================

/// Generated key pair with a self-signed certificate
pub struct TestKeys {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl TestKeys {
    pub fn generate(common_name: &str) -> Self {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        Self {
            certificate_pem: String::from_utf8(cert.to_pem().unwrap()).unwrap(),
            private_key_pem: String::from_utf8(pkey.private_key_to_pem_pkcs8().unwrap())
                .unwrap(),
        }
    }

    pub fn credentials(&self) -> SigningCredentials {
        SigningCredentials::from_pem(&self.certificate_pem, &self.private_key_pem).unwrap()
    }
}

// ============================================================================
// Mock Attribute Authority
// ============================================================================

/// Answers each attribute query with a signed response to that query
pub struct SignedAttributeResponder {
    pub keys: TestKeys,
    pub attributes: Vec<(String, Vec<String>)>,
}

impl SignedAttributeResponder {
    pub fn new(keys: TestKeys, attributes: &[(&str, &[&str])]) -> Self {
        Self {
            keys,
            attributes: attributes
                .iter()
                .map(|(name, values)| {
                    (
                        (*name).to_string(),
                        values.iter().map(|v| (*v).to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Signed `samlp:Response` answering `query_id` about `subject`
    pub fn response_xml(&self, query_id: &str, subject: &str) -> String {
        let statement: String = self
            .attributes
            .iter()
            .map(|(name, values)| {
                let values: String = values
                    .iter()
                    .map(|v| format!("<saml:AttributeValue>{v}</saml:AttributeValue>"))
                    .collect();
                format!("<saml:Attribute Name=\"{name}\">{values}</saml:Attribute>")
            })
            .collect();
        let xml = format!(
            "<samlp:Response xmlns:samlp=\"{NS_SAMLP}\" xmlns:saml=\"{NS_SAML}\" ID=\"_response\" \
             InResponseTo=\"{query_id}\" Version=\"2.0\" IssueInstant=\"2024-01-01T00:00:00Z\">\
             <saml:Issuer>{AA_ENTITY_ID}</saml:Issuer>\
             <samlp:Status><samlp:StatusCode Value=\"{STATUS_SUCCESS}\"/></samlp:Status>\
             <saml:Assertion ID=\"_assertion\" Version=\"2.0\" IssueInstant=\"2024-01-01T00:00:00Z\">\
             <saml:Issuer>{AA_ENTITY_ID}</saml:Issuer>\
             <saml:Subject><saml:NameID>{subject}</saml:NameID></saml:Subject>\
             <saml:AttributeStatement>{statement}</saml:AttributeStatement>\
             </saml:Assertion></samlp:Response>"
        );
        sign_enveloped(
            &xml,
            "_response",
            &self.keys.credentials(),
            SignatureAlgorithm::RsaSha256,
        )
        .unwrap()
    }
}

impl Respond for SignedAttributeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = String::from_utf8_lossy(&request.body);
        match (query_id(&body), query_subject(&body)) {
            (Some(id), Some(subject)) => ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/xml; charset=utf-8")
                .set_body_string(soap_body(&self.response_xml(&id, &subject))),
            _ => ResponseTemplate::new(500).set_body_string(soap_fault("No AttributeQuery")),
        }
    }
}

/// `ID` of the `samlp:AttributeQuery` inside a SOAP request body
pub fn query_id(body: &str) -> Option<String> {
    let start = body.find("<samlp:AttributeQuery")?;
    let rest = &body[start..];
    let id_start = rest.find(" ID=\"")? + 5;
    let id_len = rest[id_start..].find('"')?;
    Some(rest[id_start..id_start + id_len].to_string())
}

/// `NameID` value of the subject inside a SOAP request body
pub fn query_subject(body: &str) -> Option<String> {
    let start = body.find("<saml:NameID")?;
    let rest = &body[start..];
    let value_start = rest.find('>')? + 1;
    let value_len = rest[value_start..].find("</saml:NameID>")?;
    Some(rest[value_start..value_start + value_len].to_string())
}

pub fn soap_body(message: &str) -> String {
    format!(
        "<soap:Envelope xmlns:soap=\"{NS_SOAP_ENV}\"><soap:Body>{message}</soap:Body></soap:Envelope>"
    )
}

pub fn soap_fault(reason: &str) -> String {
    soap_body(&format!(
        "<soap:Fault><faultcode>soap:Server</faultcode><faultstring>{reason}</faultstring></soap:Fault>"
    ))
}

/// Mount the signed responder on the SOAP endpoint of `server`
pub async fn mount_attribute_authority(server: &MockServer, responder: SignedAttributeResponder) {
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .and(header(
            "SOAPAction",
            "http://www.oasis-open.org/committees/security",
        ))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Metadata of the mock AA served by `server`
pub fn aa_metadata(server: &MockServer, keys: &TestKeys) -> AaMetadata {
    AaMetadata::new(AA_ENTITY_ID)
        .with_attribute_service(ServiceEndpoint::new(
            BINDING_SOAP,
            format!("{}{SOAP_PATH}", server.uri()),
        ))
        .with_signing_certificate(keys.certificate_pem.clone())
}
