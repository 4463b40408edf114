//! HTTP entry point behaviour

use super::common::{TestKeys, AA_ENTITY_ID, SP_ENTITY_ID};
use axum::{body::Body, http::Request, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use xavyo_attribute_aggregator::models::{AuthSourceRegistry, LocalSpConfig};
use xavyo_attribute_aggregator::pipeline::{AggregatorRequest, STAGE_ATTRIBUTE_REQUEST};
use xavyo_attribute_aggregator::saml::Attributes;
use xavyo_attribute_aggregator::{
    aggregator_router, create_aggregator_state, AggregatorSettings, InMemoryStateStore,
    MetadataResolver, PendingAuthState, StateStore,
};

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

/// Router with no metadata sources
fn app(states: Arc<InMemoryStateStore>) -> Router {
    let sp_keys = TestKeys::generate("sp.example.org");
    let auth_sources = AuthSourceRegistry::new().with_source(
        "default-sp",
        LocalSpConfig::new(SP_ENTITY_ID, Some(sp_keys.credentials())),
    );
    let state = create_aggregator_state(
        &settings(),
        states,
        MetadataResolver::default(),
        auth_sources,
        "https://sp.example.org/resume".to_string(),
    )
    .unwrap();
    aggregator_router(state)
}

async fn get(app: Router, uri: &str) -> (u16, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status().as_u16();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_missing_state_id_is_bad_request() {
    let (status, body) = get(
        app(Arc::new(InMemoryStateStore::new())),
        "/attributeaggregator/attributequery",
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing_state_id");
}

#[tokio::test]
async fn test_empty_state_id_is_bad_request() {
    let (status, body) = get(
        app(Arc::new(InMemoryStateStore::new())),
        "/attributeaggregator/attributequery?StateId=",
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing_state_id");
}

#[tokio::test]
async fn test_unknown_state_is_bad_request() {
    let (status, body) = get(
        app(Arc::new(InMemoryStateStore::new())),
        "/attributeaggregator/attributequery?StateId=_unknown",
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "unknown_state");
}

#[tokio::test]
async fn test_unresolvable_aa_is_server_error() {
    let states = Arc::new(InMemoryStateStore::new());
    let mut pending = PendingAuthState::new(Attributes::new(), Some("default-sp".to_string()));
    pending.set_aggregator_request(AggregatorRequest {
        auth_source_id: "default-sp".to_string(),
        entity_id: AA_ENTITY_ID.to_string(),
        subject_values: vec!["alice@example.org".to_string()],
        name_id_format: Default::default(),
        attributes: Default::default(),
        attribute_name_format: Default::default(),
    });
    let id = states
        .save(&pending, STAGE_ATTRIBUTE_REQUEST)
        .await
        .unwrap();

    let (status, body) = get(
        app(states),
        &format!("/attributeaggregator/attributequery?StateId={id}"),
    )
    .await;

    assert_eq!(status, 500);
    assert_eq!(body["error"], "metadata_not_found");
}
