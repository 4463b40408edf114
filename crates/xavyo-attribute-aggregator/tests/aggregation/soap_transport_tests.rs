//! SOAP binding transport against a mock Attribute Authority

use super::common::{
    mount_attribute_authority, soap_body, soap_fault, SignedAttributeResponder,
    TestKeys, AA_ENTITY_ID, SOAP_PATH, SP_ENTITY_ID,
};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_attribute_aggregator::models::{
    AttributeNameFormat, AttributeRequestList, LocalSpConfig, NameIdFormat,
};
use xavyo_attribute_aggregator::services::{
    parse_response, AttributeQueryTransport, NameId, QueryBuilder, QuerySigner,
    SignedAttributeQuery, SoapClient,
};
use xavyo_attribute_aggregator::AggregatorError;

fn signed_query(server: &MockServer) -> SignedAttributeQuery {
    let sp_keys = TestKeys::generate("sp.example.org");
    let sp = LocalSpConfig::new(SP_ENTITY_ID, Some(sp_keys.credentials()));
    let aa = xavyo_attribute_aggregator::AaMetadata::new(AA_ENTITY_ID);
    let query = QueryBuilder::build(
        "_relay",
        &format!("{}{SOAP_PATH}", server.uri()),
        &sp,
        NameId::new("alice@example.org", NameIdFormat::Persistent, "", ""),
        &AttributeRequestList::default(),
        AttributeNameFormat::Uri,
    );
    QuerySigner::sign(query, &sp, &aa).unwrap()
}

#[tokio::test]
async fn test_query_round_trip() {
    let server = MockServer::start().await;
    let aa_keys = TestKeys::generate("aa.example.org");
    mount_attribute_authority(
        &server,
        SignedAttributeResponder::new(aa_keys, &[("mail", &["b@y.org"])]),
    )
    .await;

    let query = signed_query(&server);
    let client = SoapClient::new(Duration::from_secs(5)).unwrap();
    let raw = client.send(&query).await.unwrap();

    let response = parse_response(&raw).unwrap();
    assert_eq!(response.in_response_to.as_deref(), Some(query.id()));
    assert_eq!(response.issuer.as_deref(), Some(AA_ENTITY_ID));
    assert!(response.signed);
    assert_eq!(
        response.assertions[0].attributes.get("mail").unwrap(),
        &["b@y.org".to_string()]
    );
}

#[tokio::test]
async fn test_request_is_soap_with_signed_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .and(header("Content-Type", "text/xml; charset=utf-8"))
        .and(header(
            "SOAPAction",
            "http://www.oasis-open.org/committees/security",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_body(
            "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ID=\"_r\"/>",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let query = signed_query(&server);
    let client = SoapClient::new(Duration::from_secs(5)).unwrap();
    client.send(&query).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("<SOAP-ENV:Body><samlp:AttributeQuery"));
    assert!(body.contains("<ds:Signature"));
}

#[tokio::test]
async fn test_soap_fault_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string(soap_fault("Unknown principal")))
        .mount(&server)
        .await;

    let client = SoapClient::new(Duration::from_secs(5)).unwrap();
    match client.send(&signed_query(&server)).await {
        Err(AggregatorError::QueryTransport(msg)) => {
            assert_eq!(msg, "SOAP fault: Unknown principal");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_error_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = SoapClient::new(Duration::from_secs(5)).unwrap();
    let err = client.send(&signed_query(&server)).await.unwrap_err();
    assert!(matches!(err, AggregatorError::QueryTransport(msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/elsewhere"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = SoapClient::new(Duration::from_secs(5)).unwrap();
    let err = client.send(&signed_query(&server)).await.unwrap_err();
    assert!(matches!(err, AggregatorError::QueryTransport(_)));
}

#[tokio::test]
async fn test_timeout_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = SoapClient::new(Duration::from_millis(200)).unwrap();
    let err = client.send(&signed_query(&server)).await.unwrap_err();
    assert!(matches!(err, AggregatorError::QueryTransport(_)));
}

#[tokio::test]
async fn test_oversized_response_is_transport_error() {
    let server = MockServer::start().await;
    let padding = "<!-- padding -->".repeat(70_000);
    Mock::given(method("POST"))
        .and(path(SOAP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(padding))
        .mount(&server)
        .await;

    let client = SoapClient::new(Duration::from_secs(5)).unwrap();
    let err = client.send(&signed_query(&server)).await.unwrap_err();
    assert!(
        matches!(err, AggregatorError::QueryTransport(msg) if msg.contains("exceeds maximum size"))
    );
}
