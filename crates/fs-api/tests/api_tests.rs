//! API Endpoint Tests
//!
//! Tests for:
//! - Health endpoint
//! - Tree listing and flat record retrieval
//! - Pre-order list retrieval
//! - Statistics reset

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use fs_api::create_router;
use fs_common::{ComponentType, FlowEvent, TRUNK_MSG_ID};
use fs_stats::{AggregateStore, FlowRegistry, StatisticsReader};

fn create_test_app() -> (axum::Router, Arc<FlowRegistry>) {
    let store = Arc::new(AggregateStore::new());
    let registry = Arc::new(FlowRegistry::new(store.clone()));
    let app = create_router(StatisticsReader::new(store));
    (app, registry)
}

fn seed_flow(registry: &FlowRegistry, trace_id: &str) {
    registry.handle(FlowEvent::CreateEntry {
        trace_id: trace_id.to_string(),
        component_id: "ProxyA".to_string(),
        component_type: ComponentType::Proxy,
        parent_id: String::new(),
        msg_id: TRUNK_MSG_ID,
        time: 0,
        is_response: false,
    });
    registry.handle(FlowEvent::CreateEntry {
        trace_id: trace_id.to_string(),
        component_id: "Seq1".to_string(),
        component_type: ComponentType::Sequence,
        parent_id: "ProxyA".to_string(),
        msg_id: TRUNK_MSG_ID,
        time: 1,
        is_response: false,
    });
    registry.handle(FlowEvent::CloseLog {
        trace_id: trace_id.to_string(),
        component_id: "Seq1".to_string(),
        parent_id: None,
        msg_id: TRUNK_MSG_ID,
        time: 5,
    });
    registry.handle(FlowEvent::Finalize {
        trace_id: trace_id.to_string(),
        time: 10,
    });
}

async fn get_body_json(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "UP");
}

#[tokio::test]
async fn test_list_trees_empty() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statistics/trees")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["treeCount"], 0);
}

#[tokio::test]
async fn test_list_trees_after_flows() {
    let (app, registry) = create_test_app();
    seed_flow(&registry, "t-1");
    seed_flow(&registry, "t-2");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statistics/trees")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["treeCount"], 1);
    assert_eq!(json["names"][0], "ProxyA");
}

#[tokio::test]
async fn test_get_tree_flat_record() {
    let (app, registry) = create_test_app();
    seed_flow(&registry, "t-1");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statistics/trees/ProxyA")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["componentId"], "ProxyA");
    assert_eq!(json["componentType"], "PROXY");
    assert_eq!(json["invocationCount"], 1);
    assert_eq!(json["avgTime"], 10.0);
    assert_eq!(json["msgId"], -1);
}

#[tokio::test]
async fn test_get_tree_as_list_is_preorder() {
    let (app, registry) = create_test_app();
    seed_flow(&registry, "t-1");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statistics/trees/ProxyA/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["componentId"], "ProxyA");
    assert_eq!(list[1]["componentId"], "Seq1");
    assert_eq!(list[1]["parentId"], "ProxyA");
    assert_eq!(list[1]["avgTime"], 4.0);
}

#[tokio::test]
async fn test_missing_tree_returns_404() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statistics/trees/Nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reset_clears_store() {
    let (app, registry) = create_test_app();
    seed_flow(&registry, "t-1");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/statistics/trees")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["reset"], true);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statistics/trees")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["treeCount"], 0);
}
