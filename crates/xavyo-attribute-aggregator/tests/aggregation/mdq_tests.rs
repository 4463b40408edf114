//! Metadata Query (MDQ) lookups against a mock responder

use super::common::{TestKeys, AA_ENTITY_ID};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_attribute_aggregator::metadata::MetadataSourceError;
use xavyo_attribute_aggregator::saml::{parse_certificate, BINDING_SOAP};
use xavyo_attribute_aggregator::services::select_endpoint;
use xavyo_attribute_aggregator::{
    AggregatorError, MdqMetadataSource, MetadataRecord, MetadataResolver, MetadataSource,
};

/// `EntityDescriptor` for the AA, with `certificate_pem` as signing key
pub fn entity_descriptor(certificate_pem: &str, soap_location: &str) -> String {
    let certificate: String = certificate_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" entityID="{AA_ENTITY_ID}">
  <md:AttributeAuthorityDescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </md:KeyDescriptor>
    <md:AttributeService Binding="urn:oasis:names:tc:SAML:2.0:bindings:URI" Location="https://aa.example.org/uri"/>
    <md:AttributeService Binding="{BINDING_SOAP}" Location="{soap_location}"/>
  </md:AttributeAuthorityDescriptor>
</md:EntityDescriptor>"#
    )
}

pub async fn mount_mdq(server: &MockServer, descriptor: String) {
    Mock::given(method("GET"))
        .and(path_regex("^/entities/https%3A%2F%2Faa\\.example\\.org$"))
        .and(header("Accept", "application/samlmetadata+xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/samlmetadata+xml")
                .set_body_string(descriptor),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_mdq_lookup() {
    let server = MockServer::start().await;
    let keys = TestKeys::generate("aa.example.org");
    mount_mdq(
        &server,
        entity_descriptor(&keys.certificate_pem, "https://aa.example.org/soap"),
    )
    .await;

    let source = MdqMetadataSource::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let record = source.get_metadata(AA_ENTITY_ID).await.unwrap().unwrap();
    let MetadataRecord::Single(metadata) = record else {
        panic!("MDQ yields a single record");
    };

    assert_eq!(metadata.entity_id, AA_ENTITY_ID);
    assert_eq!(select_endpoint(&metadata).unwrap(), "https://aa.example.org/soap");

    let certificates: Vec<_> = metadata.signing_certificates().collect();
    assert_eq!(certificates.len(), 1);
    assert!(parse_certificate(certificates[0]).is_ok());
}

#[tokio::test]
async fn test_mdq_unknown_entity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = MdqMetadataSource::new(&server.uri(), Duration::from_secs(5)).unwrap();
    assert!(source.get_metadata(AA_ENTITY_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_mdq_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = MdqMetadataSource::new(&server.uri(), Duration::from_secs(5)).unwrap();
    assert!(matches!(
        source.get_metadata(AA_ENTITY_ID).await,
        Err(MetadataSourceError::Http(_))
    ));
}

#[tokio::test]
async fn test_resolver_skips_failing_responder() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&broken)
        .await;

    let working = MockServer::start().await;
    let keys = TestKeys::generate("aa.example.org");
    mount_mdq(
        &working,
        entity_descriptor(&keys.certificate_pem, "https://aa.example.org/soap"),
    )
    .await;

    let resolver = MetadataResolver::new(vec![
        Arc::new(MdqMetadataSource::new(&broken.uri(), Duration::from_secs(5)).unwrap()),
        Arc::new(MdqMetadataSource::new(&working.uri(), Duration::from_secs(5)).unwrap()),
    ]);

    let metadata = resolver.resolve(AA_ENTITY_ID).await.unwrap();
    assert_eq!(metadata.entity_id, AA_ENTITY_ID);
}

#[tokio::test]
async fn test_resolver_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = MetadataResolver::new(vec![Arc::new(
        MdqMetadataSource::new(&server.uri(), Duration::from_secs(5)).unwrap(),
    )]);

    assert!(matches!(
        resolver.resolve(AA_ENTITY_ID).await,
        Err(AggregatorError::MetadataNotFound(_))
    ));
}
