//! CamundaGateway against an in-process engine stub.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::json;

use process_incident_core::camunda::CamundaGateway;
use process_incident_core::store_memory::MemoryIncidentStore;
use process_incident_core::{
    ControllerOptions, GatewayError, IncidentController, IncidentStore, MessageOutcome,
    WorkflowGateway,
};

#[derive(Clone, Default)]
struct Engine {
    requests: Arc<Mutex<Vec<String>>>,
    /// Instances already deleted; a second DELETE answers 404.
    stopped: Arc<Mutex<HashSet<String>>>,
}

impl Engine {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn stop_instance(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    engine
        .requests
        .lock()
        .unwrap()
        .push(format!("DELETE {id}?{}", query.unwrap_or_default()));
    match id.as_str() {
        "p-ok" => (StatusCode::OK, "").into_response(),
        "p-missing" => instance_not_found(&id),
        "p-broken" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => {
            if engine.stopped.lock().unwrap().insert(id.clone()) {
                StatusCode::NO_CONTENT.into_response()
            } else {
                instance_not_found(&id)
            }
        }
    }
}

fn instance_not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "type": "InvalidRequestException",
            "message": format!("Process instance with id {id} does not exist"),
        })),
    )
        .into_response()
}

async fn process_definition(State(engine): State<Engine>, Path(id): Path<String>) -> Response {
    engine.requests.lock().unwrap().push(format!("GET {id}"));
    match id.as_str() {
        "d1" => Json(json!({ "id": "d1", "key": "order", "name": "Order Fulfilment" }))
            .into_response(),
        "unnamed" => Json(json!({ "id": "unnamed", "name": null })).into_response(),
        "blank" => Json(json!({ "id": "blank", "name": "" })).into_response(),
        "garbled" => (StatusCode::OK, "<html>").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_engine() -> (String, Engine) {
    let engine = Engine::default();
    let app = Router::new()
        .route("/engine-rest/process-instance/:id", delete(stop_instance))
        .route("/engine-rest/process-definition/:id", get(process_definition))
        .with_state(engine.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), engine)
}

fn gateway(url: &str) -> CamundaGateway {
    CamundaGateway::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_stop_accepts_no_content() {
    let (url, engine) = spawn_engine().await;

    gateway(&url).stop_process_instance("p1", "t1").await.unwrap();

    assert_eq!(engine.requests(), vec!["DELETE p1?skipIoMappings=true".to_string()]);
}

#[tokio::test]
async fn test_stop_accepts_ok() {
    let (url, _engine) = spawn_engine().await;

    gateway(&url).stop_process_instance("p-ok", "t1").await.unwrap();
}

#[tokio::test]
async fn test_stop_treats_missing_instance_as_stopped() {
    let (url, engine) = spawn_engine().await;
    let gateway = gateway(&url);

    gateway.stop_process_instance("p-missing", "t1").await.unwrap();
    gateway.stop_process_instance("p1", "t1").await.unwrap();
    gateway.stop_process_instance("p1", "t1").await.unwrap();

    assert_eq!(
        engine.requests(),
        vec![
            "DELETE p-missing?skipIoMappings=true".to_string(),
            "DELETE p1?skipIoMappings=true".to_string(),
            "DELETE p1?skipIoMappings=true".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_stop_reports_error_status() {
    let (url, _engine) = spawn_engine().await;

    let err = gateway(&url)
        .stop_process_instance("p-broken", "t1")
        .await
        .unwrap_err();
    match err {
        GatewayError::Status { status, url, body } => {
            assert_eq!(status, 500);
            assert!(url.ends_with("/engine-rest/process-instance/p-broken?skipIoMappings=true"));
            assert_eq!(body, "boom");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resolve_reads_definition_name() {
    let (url, engine) = spawn_engine().await;

    let name = gateway(&url).resolve_deployment_name("d1", "t1").await.unwrap();

    assert_eq!(name, "Order Fulfilment");
    assert_eq!(engine.requests(), vec!["GET d1".to_string()]);
}

#[tokio::test]
async fn test_resolve_rejects_missing_or_empty_name() {
    let (url, _engine) = spawn_engine().await;
    let gateway = gateway(&url);

    for id in ["unnamed", "blank", "garbled"] {
        let err = gateway.resolve_deployment_name(id, "t1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)), "{id}: {err:?}");
    }
}

#[tokio::test]
async fn test_resolve_unknown_definition() {
    let (url, _engine) = spawn_engine().await;

    let err = gateway(&url)
        .resolve_deployment_name("nope", "t1")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 404, .. }));
}

#[tokio::test]
async fn test_tenant_requests_go_to_their_engine() {
    let (default_url, default_engine) = spawn_engine().await;
    let (acme_url, acme_engine) = spawn_engine().await;
    let gateway = gateway(&default_url)
        .with_tenant_engine("acme", &acme_url)
        .unwrap();

    gateway.stop_process_instance("p1", "acme").await.unwrap();
    gateway.stop_process_instance("p2", "other").await.unwrap();

    assert_eq!(acme_engine.requests(), vec!["DELETE p1?skipIoMappings=true".to_string()]);
    assert_eq!(default_engine.requests(), vec!["DELETE p2?skipIoMappings=true".to_string()]);
}

#[tokio::test]
async fn test_unreachable_engine_is_http_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = gateway(&format!("http://{addr}"))
        .stop_process_instance("p1", "t1")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Http(_)));
}

// ---------------------------------------------------------------------------
// Controller over the HTTP gateway
// ---------------------------------------------------------------------------

fn controller(url: &str, store: Arc<MemoryIncidentStore>) -> IncidentController {
    IncidentController::new(Arc::new(gateway(url)), store, ControllerOptions::default())
}

fn incident(id: &str, instance: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "msg_version": 2,
        "process_instance_id": instance,
        "process_definition_id": "d1",
        "tenant_id": "t1",
        "error_message": "boom",
        "time": "2024-03-01T10:00:00Z",
    }))
    .unwrap()
}

#[tokio::test]
async fn test_redelivered_incident_is_handled_after_instance_stopped() {
    let (url, engine) = spawn_engine().await;
    let store = Arc::new(MemoryIncidentStore::new());
    let controller = controller(&url, store.clone());
    let payload = incident("a", "p1");

    let first = controller.handle_message(&payload).await;
    let second = controller.handle_message(&payload).await;

    assert!(matches!(first, MessageOutcome::Handled), "{first:?}");
    assert!(matches!(second, MessageOutcome::Handled), "{second:?}");
    assert_eq!(store.len().await, 1);
    let stored = store.get("a").await.unwrap().unwrap();
    assert_eq!(stored.deployment_name, "Order Fulfilment");
    assert_eq!(
        engine.requests(),
        vec![
            "DELETE p1?skipIoMappings=true".to_string(),
            "GET d1".to_string(),
            "DELETE p1?skipIoMappings=true".to_string(),
            "GET d1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_incident_for_unknown_instance_is_recorded() {
    let (url, _engine) = spawn_engine().await;
    let store = Arc::new(MemoryIncidentStore::new());
    let controller = controller(&url, store.clone());

    let outcome = controller.handle_message(&incident("gone", "p-missing")).await;

    assert!(matches!(outcome, MessageOutcome::Handled), "{outcome:?}");
    assert!(store.get("gone").await.unwrap().is_some());
}

#[tokio::test]
async fn test_engine_error_still_blocks_the_upsert() {
    let (url, _engine) = spawn_engine().await;
    let store = Arc::new(MemoryIncidentStore::new());
    let controller = controller(&url, store.clone());

    let outcome = controller.handle_message(&incident("a", "p-broken")).await;

    assert!(matches!(outcome, MessageOutcome::Failed(_)), "{outcome:?}");
    assert!(store.is_empty().await);
}
