//! Integration tests for the compute client and the wait engine
//!
//! A small axum app plays the compute service; servers advance from BUILD to
//! ACTIVE after a fixed number of status reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use nimbus_client::testing::MockCloud;
use nimbus_client::{
    status_is, ComputeClient, CreateServer, ErrorKind, MissingAs, RebootType, ServiceType,
    Transport, TransportConfig, MemoryRequestLog, WaitEngine, WaitOptions, WaitResult,
};

// =============================================================================
// Mock compute service
// =============================================================================

#[derive(Default)]
struct Compute {
    servers: HashMap<String, MockServer>,
    next_id: u32,
    actions: Vec<String>,
}

struct MockServer {
    name: String,
    reads_until_active: u32,
    status: &'static str,
}

type Shared = Arc<Mutex<Compute>>;

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"itemNotFound": {"code": 404, "message": format!("Server {id} not found")}})),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|t| t == "mock-token")
}

async fn create_server(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let name = body["server"]["name"].as_str().unwrap_or_default().to_string();
    let status = if body["server"]["imageRef"] == "broken" {
        "ERROR"
    } else {
        "BUILD"
    };

    let mut compute = state.lock();
    compute.next_id += 1;
    let id = compute.next_id;
    compute.servers.insert(
        id.to_string(),
        MockServer {
            name: name.clone(),
            reads_until_active: 2,
            status,
        },
    );
    (
        StatusCode::ACCEPTED,
        Json(json!({"server": {"id": id, "name": name, "status": status, "adminPass": "secret"}})),
    )
        .into_response()
}

async fn get_server(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut compute = state.lock();
    let Some(server) = compute.servers.get_mut(&id) else {
        return not_found(&id);
    };
    if server.status == "BUILD" {
        if server.reads_until_active == 0 {
            server.status = "ACTIVE";
        } else {
            server.reads_until_active -= 1;
        }
    }
    let progress = if server.status == "BUILD" { 50 } else { 100 };
    Json(json!({"server": {
        "id": id,
        "name": server.name,
        "status": server.status,
        "progress": progress,
        "flavor": {"id": 1},
        "image": {"id": "debian"},
        "metadata": {"os": "debian"}
    }}))
    .into_response()
}

async fn delete_server(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match state.lock().servers.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(&id),
    }
}

async fn server_action(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut compute = state.lock();
    if !compute.servers.contains_key(&id) {
        return not_found(&id);
    }
    compute.actions.push(body.to_string());
    StatusCode::ACCEPTED.into_response()
}

async fn list_servers(State(state): State<Shared>) -> Json<Value> {
    let compute = state.lock();
    let mut ids: Vec<&String> = compute.servers.keys().collect();
    ids.sort();
    let servers: Vec<Value> = ids
        .into_iter()
        .map(|id| json!({"id": id, "name": compute.servers[id].name}))
        .collect();
    Json(json!({ "servers": servers }))
}

async fn list_flavors() -> Json<Value> {
    Json(json!({"flavors": [
        {"id": 1, "name": "small", "ram": 1024, "vcpus": 1, "disk": 20},
        {"id": "2", "name": "large", "ram": 8192, "vcpus": 4, "disk": 80}
    ]}))
}

async fn overloaded() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"overLimit": {"code": 503, "message": "Service busy, try later"}})),
    )
        .into_response()
}

fn compute_router(state: Shared) -> Router {
    Router::new()
        .route("/compute/servers", get(list_servers).post(create_server))
        .route("/compute/servers/detail", get(list_servers))
        .route("/compute/servers/{id}", get(get_server).delete(delete_server))
        .route("/compute/servers/{id}/action", post(server_action))
        .route("/compute/flavors", get(list_flavors))
        .route("/compute/busy/servers/{id}", get(overloaded))
        .with_state(state)
}

async fn setup() -> (MockCloud, ComputeClient, Shared) {
    let state = Shared::default();
    let cloud = MockCloud::start(compute_router(state.clone())).await.unwrap();
    let compute = ComputeClient::new(cloud.service(ServiceType::Compute, "/compute/"));
    (cloud, compute, state)
}

fn fast_wait() -> WaitEngine {
    WaitEngine::new(WaitOptions {
        poll_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(10),
        ..WaitOptions::default()
    })
}

fn params(image: &str) -> CreateServer {
    CreateServer {
        name: "web-1".to_string(),
        flavor_id: "1".to_string(),
        image_id: image.to_string(),
        ..Default::default()
    }
}

// =============================================================================
// Compute operations
// =============================================================================

#[tokio::test]
async fn test_create_and_get_server() {
    let (_cloud, compute, _) = setup().await;

    let server = compute.create_server(&params("debian")).await.unwrap();
    assert_eq!(server.id, "1");
    assert_eq!(server.name, "web-1");
    assert_eq!(server.status.as_deref(), Some("BUILD"));
    assert_eq!(server.admin_pass.as_deref(), Some("secret"));

    let fetched = compute.get_server(&server.id).await.unwrap();
    assert_eq!(fetched.flavor.unwrap().id, "1");
    assert_eq!(fetched.metadata["os"], "debian");
}

#[tokio::test]
async fn test_list_servers_and_flavors() {
    let (_cloud, compute, _) = setup().await;
    compute.create_server(&params("debian")).await.unwrap();
    compute.create_server(&params("debian")).await.unwrap();

    assert_eq!(compute.list_servers(false).await.unwrap().len(), 2);
    assert_eq!(compute.list_servers(true).await.unwrap().len(), 2);

    let flavors = compute.list_flavors(false).await.unwrap();
    let ids: Vec<&str> = flavors.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, ["1", "2"]);
    assert_eq!(flavors[1].vcpus, Some(4));
}

#[tokio::test]
async fn test_server_actions() {
    let (_cloud, compute, state) = setup().await;
    let server = compute.create_server(&params("debian")).await.unwrap();

    compute.reboot_server(&server.id, RebootType::Hard).await.unwrap();
    compute.shutdown_server(&server.id).await.unwrap();
    compute.start_server(&server.id).await.unwrap();

    let actions = state.lock().actions.clone();
    assert_eq!(
        actions,
        [
            r#"{"reboot":{"type":"HARD"}}"#,
            r#"{"shutdown":{}}"#,
            r#"{"start":{}}"#
        ]
    );

    let err = compute.start_server("999").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_error_translation() {
    let (_cloud, compute, _) = setup().await;

    let err = compute.get_server("404").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.http_status, Some(404));
    assert_eq!(err.message, "Server 404 not found");
    assert!(!err.retryable);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let state = Shared::default();
    let cloud = MockCloud::start(compute_router(state)).await.unwrap();
    let busy = ComputeClient::new(cloud.service(ServiceType::Compute, "/compute/busy/"));

    let err = busy.get_server("1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert_eq!(err.http_status, Some(503));
    assert_eq!(err.message, "Service busy, try later");
    assert!(err.retryable);
}

#[tokio::test]
async fn test_rejected_token() {
    let state = Shared::default();
    let cloud = MockCloud::start(compute_router(state)).await.unwrap();
    let endpoint = nimbus_client::Endpoint::new(ServiceType::Compute, cloud.url("/compute/"), None);
    let service = nimbus_client::ServiceClient::new(
        cloud.transport.clone(),
        Arc::new(endpoint),
        nimbus_client::Credentials::new("stale-token"),
    );

    let err = ComputeClient::new(service)
        .create_server(&params("debian"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(err.message, "invalid token");
}

// =============================================================================
// Transport behaviour observed end to end
// =============================================================================

#[tokio::test]
async fn test_path_segments_are_percent_encoded() {
    let (cloud, compute, _) = setup().await;

    let err = compute.get_server("a b/c&d").await.unwrap_err();
    // One opaque segment: the route matched and the handler saw the decoded id
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.message, "Server a b/c&d not found");

    let lines = cloud.log.lines();
    assert!(lines
        .iter()
        .any(|l| l.ends_with("/compute/servers/a%20b%2Fc%26d")));
}

#[tokio::test]
async fn test_request_log_redacts_token() {
    let (cloud, compute, _) = setup().await;
    compute.create_server(&params("debian")).await.unwrap();

    let lines = cloud.log.lines();
    assert!(lines.iter().any(|l| l == "> X-Auth-Token: ..."));
    assert!(lines.iter().any(|l| l.starts_with("< 202")));
    assert!(lines.iter().any(|l| l.starts_with("> data size: ")));
    assert!(lines.iter().all(|l| !l.contains("mock-token")));
}

/// Compute client aimed at a port nothing listens on
fn unreachable_compute(path: &str) -> ComputeClient {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = Transport::new(
        TransportConfig {
            connect_timeout: Duration::from_secs(2),
            ..TransportConfig::default()
        },
        Arc::new(MemoryRequestLog::new()),
    )
    .unwrap();
    let endpoint = nimbus_client::Endpoint::new(
        ServiceType::Compute,
        format!("http://{addr}{path}").parse().unwrap(),
        None,
    );
    ComputeClient::new(nimbus_client::ServiceClient::new(
        transport,
        Arc::new(endpoint),
        nimbus_client::Credentials::new("t"),
    ))
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let compute = unreachable_compute("/compute/");

    let err = compute.list_servers(false).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert!(err.retryable);
    assert_eq!(err.http_status, None);
}

#[tokio::test]
async fn test_tls_words_in_url_do_not_make_a_tls_error() {
    let compute = unreachable_compute("/ssl-gateway/tls/compute/");

    let err = compute.list_servers(false).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert!(err.retryable);
    assert!(!err.message.contains("ssl-gateway"));
}

// =============================================================================
// Waits against the mock
// =============================================================================

#[tokio::test]
async fn test_wait_for_active_server() {
    let (_cloud, compute, _) = setup().await;
    let server = compute.create_server(&params("debian")).await.unwrap();

    let mut seen = Vec::new();
    let outcome = fast_wait()
        .wait_until_with_progress(
            &compute,
            &server.id,
            status_is("ACTIVE"),
            status_is("ERROR"),
            |s| seen.push((s.status.clone(), s.progress())),
        )
        .await
        .unwrap();

    assert_eq!(outcome.result, WaitResult::Succeeded);
    assert_eq!(outcome.polls, 3);
    assert_eq!(outcome.final_status(), Some("ACTIVE"));
    assert_eq!(
        seen,
        [
            ("BUILD".to_string(), Some(50)),
            ("BUILD".to_string(), Some(50)),
            ("ACTIVE".to_string(), Some(100)),
        ]
    );
}

#[tokio::test]
async fn test_wait_reports_failed_build() {
    let (_cloud, compute, _) = setup().await;
    let server = compute.create_server(&params("broken")).await.unwrap();

    let outcome = fast_wait()
        .wait_until(&compute, &server.id, status_is("ACTIVE"), status_is("ERROR"))
        .await
        .unwrap();
    assert_eq!(outcome.result, WaitResult::Failed);
    assert_eq!(outcome.polls, 1);
}

#[tokio::test]
async fn test_wait_for_deletion() {
    let (_cloud, compute, _) = setup().await;
    let server = compute.create_server(&params("debian")).await.unwrap();
    compute.delete_server(&server.id).await.unwrap();

    // Without the adapter the vanished server is an error
    let err = fast_wait()
        .wait_until(&compute, &server.id, status_is("DELETED"), status_is("ERROR"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let deleted = MissingAs::new(compute.clone(), "DELETED");
    let outcome = fast_wait()
        .wait_until(&deleted, &server.id, status_is("DELETED"), status_is("ERROR"))
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.final_status(), Some("DELETED"));
}
