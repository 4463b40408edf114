//! Full aggregation flow: filter, query engine over SOAP, pipeline resume

use super::common::{
    aa_metadata, mount_attribute_authority, SignedAttributeResponder, TestKeys, AA_ENTITY_ID,
    SOAP_PATH, SP_ENTITY_ID,
};
use super::mdq_tests::{entity_descriptor, mount_mdq};
use axum::{body::Body, http::Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;
use xavyo_attribute_aggregator::models::{
    AttributeRequestEntry, AuthSourceRegistry, FilterConfig, LocalSpConfig,
};
use xavyo_attribute_aggregator::pipeline::STAGE_RESUMED;
use xavyo_attribute_aggregator::saml::Attributes;
use xavyo_attribute_aggregator::{
    aggregator_router, create_aggregator_state, AggregatorSettings, AttributeAggregatorFilter,
    FilterOutcome, InMemoryMetadataSource, InMemoryStateStore, MdqMetadataSource,
    MetadataResolver, PendingAuthState, StateId, StateStore,
};

const PIPELINE_RESUME_URL: &str = "https://sp.example.org/module.php/core/resume";

fn settings() -> AggregatorSettings {
    let vars = HashMap::from([(
        "ATTRIBUTE_AGGREGATOR_BASE_URL".to_string(),
        "https://sp.example.org".to_string(),
    )]);
    AggregatorSettings::from_reader(move |key| {
        vars.get(key).cloned().ok_or(std::env::VarError::NotPresent)
    })
    .unwrap()
}

fn auth_sources() -> AuthSourceRegistry {
    let sp_keys = TestKeys::generate("sp.example.org");
    AuthSourceRegistry::new().with_source(
        "default-sp",
        LocalSpConfig::new(SP_ENTITY_ID, Some(sp_keys.credentials())),
    )
}

fn filter_config(policy: &str) -> FilterConfig {
    FilterConfig {
        entity_id: Some(AA_ENTITY_ID.to_string()),
        attribute_id: Some("eduPersonPrincipalName".to_string()),
        attributes: vec![AttributeRequestEntry {
            name: "mail".to_string(),
            values: None,
            multi_source: Some(policy.to_string()),
        }],
        ..Default::default()
    }
}

fn authenticated_state() -> PendingAuthState {
    PendingAuthState::new(
        Attributes::from([
            (
                "eduPersonPrincipalName".to_string(),
                vec!["alice@example.org".to_string()],
            ),
            ("mail".to_string(), vec!["a@x.org".to_string()]),
        ]),
        Some("default-sp".to_string()),
    )
}

/// Run the filter, then follow its redirect through the router.
///
/// Returns the resumed state.
async fn run_flow(metadata: MetadataResolver, policy: &str) -> PendingAuthState {
    let settings = settings();
    let states = Arc::new(InMemoryStateStore::new());

    let filter = AttributeAggregatorFilter::new(
        filter_config(policy),
        &metadata,
        settings.attribute_query_url(),
    )
    .await
    .unwrap();
    let outcome = filter
        .process(authenticated_state(), states.as_ref())
        .await
        .unwrap();
    let FilterOutcome::Suspend { .. } = &outcome else {
        panic!("expected the filter to suspend, got {outcome:?}");
    };
    let redirect = url::Url::parse(&outcome.redirect_url().unwrap().unwrap()).unwrap();
    assert_eq!(redirect.path(), "/attributeaggregator/attributequery");

    let state = create_aggregator_state(
        &settings,
        states.clone(),
        metadata,
        auth_sources(),
        PIPELINE_RESUME_URL.to_string(),
    )
    .unwrap();
    let app = aggregator_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("{}?{}", redirect.path(), redirect.query().unwrap()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 303);

    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with(&format!("{PIPELINE_RESUME_URL}?StateId=")));
    let location = url::Url::parse(location).unwrap();
    let (_, resumed_id) = location
        .query_pairs()
        .find(|(key, _)| key == "StateId")
        .unwrap();

    states
        .load(&StateId::from(resumed_id.as_ref()), STAGE_RESUMED)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_merge_through_soap() {
    let server = MockServer::start().await;
    let aa_keys = TestKeys::generate("aa.example.org");
    let metadata = MetadataResolver::default().with_source(Arc::new(
        InMemoryMetadataSource::new().with_entity(aa_metadata(&server, &aa_keys)),
    ));
    mount_attribute_authority(
        &server,
        SignedAttributeResponder::new(
            aa_keys,
            &[("mail", &["b@y.org"]), ("eduPersonEntitlement", &["role1"])],
        ),
    )
    .await;

    let resumed = run_flow(metadata, "merge").await;
    assert_eq!(
        resumed.attributes["mail"],
        vec!["a@x.org".to_string(), "b@y.org".to_string()]
    );
    assert_eq!(
        resumed.attributes["eduPersonEntitlement"],
        vec!["role1".to_string()]
    );
    assert_eq!(
        resumed.attributes["eduPersonPrincipalName"],
        vec!["alice@example.org".to_string()]
    );
}

#[tokio::test]
async fn test_keep_with_mdq_metadata() {
    let aa = MockServer::start().await;
    let aa_keys = TestKeys::generate("aa.example.org");
    let mdq = MockServer::start().await;
    mount_mdq(
        &mdq,
        entity_descriptor(&aa_keys.certificate_pem, &format!("{}{SOAP_PATH}", aa.uri())),
    )
    .await;
    mount_attribute_authority(
        &aa,
        SignedAttributeResponder::new(aa_keys, &[("mail", &["b@y.org"])]),
    )
    .await;

    let metadata = MetadataResolver::default().with_source(Arc::new(
        MdqMetadataSource::new(&mdq.uri(), Duration::from_secs(5)).unwrap(),
    ));

    let resumed = run_flow(metadata, "keep").await;
    assert_eq!(resumed.attributes["mail"], vec!["a@x.org".to_string()]);
}

#[tokio::test]
async fn test_state_id_cannot_be_replayed() {
    let server = MockServer::start().await;
    let aa_keys = TestKeys::generate("aa.example.org");
    let metadata = MetadataResolver::default().with_source(Arc::new(
        InMemoryMetadataSource::new().with_entity(aa_metadata(&server, &aa_keys)),
    ));
    mount_attribute_authority(
        &server,
        SignedAttributeResponder::new(aa_keys, &[("mail", &["b@y.org"])]),
    )
    .await;

    let settings = settings();
    let states = Arc::new(InMemoryStateStore::new());
    let filter = AttributeAggregatorFilter::new(
        filter_config("merge"),
        &metadata,
        settings.attribute_query_url(),
    )
    .await
    .unwrap();
    let outcome = filter
        .process(authenticated_state(), states.as_ref())
        .await
        .unwrap();
    let redirect = url::Url::parse(&outcome.redirect_url().unwrap().unwrap()).unwrap();
    let uri = format!("{}?{}", redirect.path(), redirect.query().unwrap());

    let app = aggregator_router(
        create_aggregator_state(
            &settings,
            states,
            metadata,
            auth_sources(),
            PIPELINE_RESUME_URL.to_string(),
        )
        .unwrap(),
    );

    let first = app
        .clone()
        .oneshot(Request::builder().uri(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), 303);

    let replay = app
        .oneshot(Request::builder().uri(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(replay.status(), 400);
    let body = axum::body::to_bytes(replay.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "unknown_state");

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
