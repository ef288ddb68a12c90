//! Integration tests for the volume and network clients, and for request
//! retries through `ServiceClient`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use nimbus_client::testing::MockCloud;
use nimbus_client::{
    status_is, ErrorKind, MissingAs, NetworkClient, RetryPolicy, ServiceType, VolumeClient,
    WaitEngine, WaitOptions, WaitResult,
};

#[derive(Default)]
struct Block {
    /// id -> (body, status reads left before the pending status clears)
    volumes: HashMap<String, (Value, u32)>,
    networks: HashMap<String, (Value, u32)>,
    next_id: u32,
    /// 503 replies still owed by the flaky route
    flaky_failures: u32,
    flaky_calls: u32,
    /// Status reads answered by the always-failing route
    outage_calls: u32,
}

type Shared = Arc<Mutex<Block>>;

fn missing(kind: &str, id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"itemNotFound": {"code": 404, "message": format!("{kind} {id} not found")}})),
    )
        .into_response()
}

/// Read a resource, moving it from `pending` to `settled` after its reads run out
fn read(
    items: &mut HashMap<String, (Value, u32)>,
    id: &str,
    pending: &str,
    settled: &str,
) -> Option<Value> {
    let (body, reads_left) = items.get_mut(id)?;
    if body["status"] == pending {
        if *reads_left == 0 {
            body["status"] = json!(settled);
        } else {
            *reads_left -= 1;
        }
    }
    Some(body.clone())
}

async fn create_volume(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut block = state.lock();
    block.next_id += 1;
    let id = block.next_id.to_string();
    let mut volume = body["volume"].clone();
    volume["id"] = json!(id);
    volume["status"] = json!("creating");
    block.volumes.insert(id, (volume.clone(), 1));
    (StatusCode::ACCEPTED, Json(json!({ "volume": volume }))).into_response()
}

async fn get_volume(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match read(&mut state.lock().volumes, &id, "creating", "available") {
        Some(volume) => Json(json!({ "volume": volume })).into_response(),
        None => missing("Volume", &id),
    }
}

async fn delete_volume(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match state.lock().volumes.remove(&id) {
        Some(_) => StatusCode::ACCEPTED.into_response(),
        None => missing("Volume", &id),
    }
}

async fn list_volumes(State(state): State<Shared>) -> Json<Value> {
    let block = state.lock();
    let volumes: Vec<&Value> = block.volumes.values().map(|(v, _)| v).collect();
    Json(json!({ "volumes": volumes }))
}

async fn create_network(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut block = state.lock();
    block.next_id += 1;
    let id = block.next_id.to_string();
    let network = json!({
        "id": block.next_id,
        "name": body["network"]["name"],
        "type": body["network"].get("type").cloned().unwrap_or(json!("MAC_FILTERED")),
        "status": "BUILD",
        "shared": false,
        "subnets": []
    });
    block.networks.insert(id, (network.clone(), 0));
    (StatusCode::CREATED, Json(json!({ "network": network }))).into_response()
}

async fn get_network(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match read(&mut state.lock().networks, &id, "BUILD", "ACTIVE") {
        Some(network) => Json(json!({ "network": network })).into_response(),
        None => missing("Network", &id),
    }
}

async fn delete_network(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match state.lock().networks.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => missing("Network", &id),
    }
}

async fn list_networks(State(state): State<Shared>) -> Json<Value> {
    let block = state.lock();
    let networks: Vec<&Value> = block.networks.values().map(|(n, _)| n).collect();
    Json(json!({ "networks": networks }))
}

async fn flaky_networks(State(state): State<Shared>) -> Response {
    let mut block = state.lock();
    block.flaky_calls += 1;
    if block.flaky_failures > 0 {
        block.flaky_failures -= 1;
        return (StatusCode::BAD_GATEWAY, "upstream hiccup").into_response();
    }
    Json(json!({"networks": [{"id": 1, "name": "public"}]})).into_response()
}

async fn network_outage(State(state): State<Shared>, Path(_id): Path<String>) -> Response {
    state.lock().outage_calls += 1;
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
}

async fn setup() -> (MockCloud, VolumeClient, NetworkClient, Shared) {
    let state = Shared::default();
    let router = Router::new()
        .route("/volume/volumes", get(list_volumes).post(create_volume))
        .route("/volume/volumes/detail", get(list_volumes))
        .route("/volume/volumes/{id}", get(get_volume).delete(delete_volume))
        .route("/network/networks", get(list_networks).post(create_network))
        .route("/network/networks/{id}", get(get_network).delete(delete_network))
        .route("/flaky/networks", get(flaky_networks))
        .route("/outage/networks/{id}", get(network_outage))
        .with_state(state.clone());
    let cloud = MockCloud::start(router).await.unwrap();
    let volumes = VolumeClient::new(cloud.service(ServiceType::Volume, "/volume/"));
    let networks = NetworkClient::new(cloud.service(ServiceType::Network, "/network/"));
    (cloud, volumes, networks, state)
}

fn fast_wait() -> WaitEngine {
    WaitEngine::new(WaitOptions {
        poll_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(10),
        ..WaitOptions::default()
    })
}

// =============================================================================
// Volumes
// =============================================================================

#[tokio::test]
async fn test_volume_lifecycle() {
    let (_cloud, volumes, _, _) = setup().await;

    let volume = volumes.create_volume(10, "data", Some("42")).await.unwrap();
    assert_eq!(volume.id, "1");
    assert_eq!(volume.size, 10);
    assert_eq!(volume.server_id.as_deref(), Some("42"));
    assert_eq!(volume.status.as_deref(), Some("creating"));

    // Status values are matched without regard to case
    let outcome = fast_wait()
        .wait_until(&volumes, &volume.id, status_is("AVAILABLE"), status_is("ERROR"))
        .await
        .unwrap();
    assert_eq!(outcome.result, WaitResult::Succeeded);
    assert_eq!(outcome.polls, 2);
    assert_eq!(outcome.final_status(), Some("available"));

    assert_eq!(volumes.list_volumes(true).await.unwrap().len(), 1);
    assert_eq!(volumes.get_volume(&volume.id).await.unwrap().name.as_deref(), Some("data"));

    volumes.delete_volume(&volume.id).await.unwrap();
    let err = volumes.get_volume(&volume.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.message, "Volume 1 not found");
}

#[tokio::test]
async fn test_volume_deletion_wait() {
    let (_cloud, volumes, _, _) = setup().await;
    let volume = volumes.create_volume(1, "scratch", None).await.unwrap();
    volumes.delete_volume(&volume.id).await.unwrap();

    let source = MissingAs::new(volumes, "DELETED");
    let outcome = fast_wait()
        .wait_until(&source, &volume.id, status_is("DELETED"), status_is("ERROR"))
        .await
        .unwrap();
    assert_eq!(outcome.result, WaitResult::Succeeded);
    assert_eq!(outcome.polls, 1);
}

// =============================================================================
// Networks
// =============================================================================

#[tokio::test]
async fn test_network_lifecycle() {
    let (_cloud, _, networks, _) = setup().await;

    let network = networks
        .create_network("private", Some("IP_LESS_ROUTED"))
        .await
        .unwrap();
    assert_eq!(network.id, "1");
    assert_eq!(network.network_type.as_deref(), Some("IP_LESS_ROUTED"));

    let defaulted = networks.create_network("other", None).await.unwrap();
    assert_eq!(defaulted.network_type.as_deref(), Some("MAC_FILTERED"));
    assert_eq!(networks.list_networks().await.unwrap().len(), 2);

    let outcome = fast_wait()
        .wait_until(&networks, &network.id, status_is("ACTIVE"), status_is("ERROR"))
        .await
        .unwrap();
    assert_eq!(outcome.result, WaitResult::Succeeded);
    assert_eq!(outcome.polls, 1);

    networks.delete_network(&network.id).await.unwrap();
    let err = networks.delete_network(&network.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_wait_on_unknown_network_fails_fast() {
    let (_cloud, _, networks, _) = setup().await;

    let err = fast_wait()
        .wait_until(&networks, "404", status_is("ACTIVE"), status_is("ERROR"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_get_requests_are_retried() {
    let (cloud, _, _, state) = setup().await;
    state.lock().flaky_failures = 2;

    let retry = RetryPolicy::attempts(3).with_delay(Duration::from_millis(10));
    let flaky = NetworkClient::new(cloud.service(ServiceType::Network, "/flaky/").with_retry(retry));

    let list = flaky.list_networks().await.unwrap();
    assert_eq!(list[0].name, "public");
    assert_eq!(state.lock().flaky_calls, 3);
}

#[tokio::test]
async fn test_retries_stop_at_attempt_cap() {
    let (cloud, _, _, state) = setup().await;
    state.lock().flaky_failures = 5;

    let retry = RetryPolicy::attempts(2).with_delay(Duration::from_millis(10));
    let flaky = NetworkClient::new(cloud.service(ServiceType::Network, "/flaky/").with_retry(retry));

    let err = flaky.list_networks().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert_eq!(err.http_status, Some(502));
    assert_eq!(err.message, "upstream hiccup");
    assert_eq!(state.lock().flaky_calls, 2);
}

#[tokio::test]
async fn test_wait_owns_the_retry_cap() {
    let (cloud, _, _, state) = setup().await;

    // Same policy on the client and the engine, as the CLI session wires it
    let retry = RetryPolicy::attempts(3).with_delay(Duration::from_millis(10));
    let networks =
        NetworkClient::new(cloud.service(ServiceType::Network, "/outage/").with_retry(retry));
    let engine = WaitEngine::new(WaitOptions {
        poll_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(10),
        retry,
        ..WaitOptions::default()
    });

    let err = engine
        .wait_until(&networks, "7", status_is("ACTIVE"), status_is("ERROR"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert_eq!(err.http_status, Some(503));
    assert_eq!(state.lock().outage_calls, 3);

    // Plain reads still use the client's policy
    state.lock().outage_calls = 0;
    networks.get_network("7").await.unwrap_err();
    assert_eq!(state.lock().outage_calls, 3);
}
