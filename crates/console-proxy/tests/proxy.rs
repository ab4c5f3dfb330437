//! End-to-end tests: the proxy router served over a real socket,
//! forwarding to a stub gateway bound on an ephemeral port.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use console_proxy::domain::config::ProxyConfig;
use console_proxy::service::{router, AppState};
use reqwest::header::CONTENT_LENGTH;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const APPS_BODY: &str = r#"[{"id":"purchase","status":"RUNNING"}]"#;

#[derive(Clone, Default)]
struct Stub {
    metrics_hits: Arc<AtomicUsize>,
    reset_hits: Arc<AtomicUsize>,
    upload: Arc<Mutex<Option<(String, Vec<u8>)>>>,
    fail_upload: Arc<AtomicBool>,
    garble_metrics: Arc<AtomicBool>,
}

fn stub_router(stub: Stub) -> Router {
    Router::new()
        .route("/v2/apps", get(stub_apps).put(stub_deploy))
        .route("/v2/echo", post(stub_echo))
        .route("/v2/query", get(stub_query))
        .route("/v2/bad", get(stub_bad))
        .route("/v2/deploy/status", get(stub_deploy_status))
        .route("/v2/unrecoverable/reset", delete(stub_reset))
        .route("/metrics", post(stub_metrics))
        .route("/metrics/available/apps/purchase", get(stub_available))
        .route("/metrics/available/apps/broken", get(stub_available_broken))
        .route("/api/vpc/list/:key", get(stub_vpc_list))
        .with_state(stub)
}

async fn stub_apps() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], APPS_BODY)
}

async fn stub_echo(body: Bytes) -> Bytes {
    body
}

async fn stub_query(RawQuery(query): RawQuery) -> String {
    query.unwrap_or_default()
}

async fn stub_bad() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "no such thing")
}

async fn stub_deploy_status() -> Json<Value> {
    Json(json!({"status": "DEPLOYED"}))
}

async fn stub_reset(State(stub): State<Stub>) -> &'static str {
    stub.reset_hits.fetch_add(1, Ordering::SeqCst);
    "OK"
}

async fn stub_metrics(State(stub): State<Stub>, body: Bytes) -> Response {
    stub.metrics_hits.fetch_add(1, Ordering::SeqCst);
    if stub.garble_metrics.load(Ordering::SeqCst) {
        return ([(CONTENT_TYPE, "text/html")], "<html>not json").into_response();
    }
    ([(CONTENT_TYPE, "application/json")], body).into_response()
}

async fn stub_available() -> Json<Value> {
    Json(json!([{"name": "events.in", "path": "/apps/purchase/events.in"}]))
}

async fn stub_available_broken() -> &'static str {
    "no metrics here"
}

async fn stub_deploy(State(stub): State<Stub>, headers: HeaderMap, body: Bytes) -> Response {
    let name = headers
        .get("X-Archive-Name")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if stub.fail_upload.load(Ordering::SeqCst) {
        return (StatusCode::BAD_REQUEST, "deploy rejected").into_response();
    }
    *stub.upload.lock().unwrap() = Some((name, body.to_vec()));
    "OK".into_response()
}

async fn stub_vpc_list(Path(key): Path<String>) -> String {
    format!("[\"vpc-{key}\"]")
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    proxy: SocketAddr,
    stub: Stub,
    upload_dir: tempfile::TempDir,
    _workdir: tempfile::TempDir,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let stub = Stub::default();
        let stub_addr = spawn(stub_router(stub.clone())).await;

        let workdir = tempfile::tempdir().unwrap();
        let upload_dir = tempfile::tempdir().unwrap();

        let mut config = ProxyConfig::default();
        config.gateway.host = "127.0.0.1".into();
        config.gateway.port = stub_addr.port();
        config.accounts.host = "127.0.0.1".into();
        config.accounts.port = stub_addr.port();
        config.accounts.secure = false;
        config.credential_path = workdir.path().join(".credential");
        config.upload.dir = Some(upload_dir.path().to_path_buf());

        let state = AppState::new(config).unwrap();
        let proxy = spawn(router(state)).await;

        Self {
            proxy,
            stub,
            upload_dir,
            _workdir: workdir,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.proxy, path)
    }
}

/// Proxy wired against a port that nothing listens on.
async fn unreachable_harness() -> Harness {
    let mut harness = Harness::start().await;
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let mut config = ProxyConfig::default();
    config.gateway.host = "127.0.0.1".into();
    config.gateway.port = port;
    config.credential_path = harness._workdir.path().join(".credential");
    let state = AppState::new(config).unwrap();
    harness.proxy = spawn(router(state)).await;
    harness
}

#[tokio::test]
async fn rest_get_passes_backend_body_through_byte_for_byte() {
    let h = Harness::start().await;
    let response = h.client.get(h.url("/rest/apps")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap(), APPS_BODY.as_bytes());
}

#[tokio::test]
async fn repeated_rest_gets_are_idempotent() {
    let h = Harness::start().await;
    let first = h
        .client
        .get(h.url("/rest/apps"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let second = h
        .client
        .get(h.url("/rest/apps"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn rest_forward_preserves_query_string() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/rest/query?status=RUNNING&limit=5"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "status=RUNNING&limit=5");
}

#[tokio::test]
async fn rest_post_serializes_structured_body_canonically() {
    let h = Harness::start().await;
    let response = h
        .client
        .post(h.url("/rest/echo"))
        .body("{ \"name\" : \"purchase\" , \"count\": [1, 2] }")
        .send()
        .await
        .unwrap();
    let expected: Value = json!({"name": "purchase", "count": [1, 2]});
    assert_eq!(response.text().await.unwrap(), expected.to_string());
}

#[tokio::test]
async fn rest_post_passes_non_json_body_through() {
    let h = Harness::start().await;
    let response = h
        .client
        .post(h.url("/rest/echo"))
        .body("plain text payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "plain text payload");
}

#[tokio::test]
async fn rest_non_200_surfaces_backend_body_at_500() {
    let h = Harness::start().await;
    let response = h.client.get(h.url("/rest/bad")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "no such thing");
}

#[tokio::test]
async fn unreachable_gateway_yields_fatal_envelope_for_every_verb() {
    let h = unreachable_harness().await;
    for send in [
        h.client.get(h.url("/rest/apps")),
        h.client.post(h.url("/rest/apps")),
        h.client.put(h.url("/rest/apps")),
        h.client.delete(h.url("/rest/apps")),
    ] {
        let response = send.send().await.unwrap();
        assert_eq!(response.status(), 500);
        let envelope: Value = response.json().await.unwrap();
        assert!(envelope["result"].is_null());
        let fatal = envelope["error"]["fatal"].as_str().unwrap();
        assert!(fatal.starts_with("GatewayService: "), "got {fatal}");
        assert!(fatal.contains("ECONNREFUSED"), "got {fatal}");
    }
}

#[tokio::test]
async fn empty_metrics_list_is_rejected_without_backend_call() {
    let h = Harness::start().await;
    let response = h
        .client
        .post(h.url("/metrics"))
        .body("[]")
        .send()
        .await
        .unwrap();
    let envelope: Value = response.json().await.unwrap();
    assert!(envelope["result"].is_null());
    assert_eq!(
        envelope["error"]["fatal"],
        "MetricsService: No paths provided."
    );
    assert_eq!(h.stub.metrics_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn metrics_batch_returns_parsed_result() {
    let h = Harness::start().await;
    let response = h
        .client
        .post(h.url("/metrics"))
        .body(r#"["path/a","path/b"]"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let envelope: Value = response.json().await.unwrap();
    assert_eq!(envelope["result"], json!(["path/a", "path/b"]));
    assert!(envelope["error"].is_null());
    assert_eq!(h.stub.metrics_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_metrics_body_is_soft_parsing_error() {
    let h = Harness::start().await;
    h.stub.garble_metrics.store(true, Ordering::SeqCst);

    let response = h
        .client
        .post(h.url("/metrics"))
        .body(r#"["path/a"]"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let envelope: Value = response.json().await.unwrap();
    assert!(envelope["result"].is_null());
    assert_eq!(envelope["error"], "Parsing Error");
    assert_eq!(h.stub.metrics_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_discovery_body_rides_in_error_slot() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/rest/metrics/user/apps/broken"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let envelope: Value = response.json().await.unwrap();
    assert!(envelope["result"].is_null());
    assert_eq!(envelope["error"], "no metrics here");
}

#[tokio::test]
async fn user_metrics_discovery_wraps_gateway_json() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/rest/metrics/user/apps/purchase"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let envelope: Value = response.json().await.unwrap();
    assert!(envelope["result"].is_array());
    assert!(envelope["error"].is_null());
}

#[tokio::test]
async fn system_metrics_catalogue_is_served_locally() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/rest/metrics/system/Flow"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let catalogue: Value = response.json().await.unwrap();
    assert!(!catalogue.as_array().unwrap().is_empty());

    let unknown = h
        .client
        .get(h.url("/rest/metrics/system/Widget"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);
}

#[tokio::test]
async fn upload_reassembles_chunks_byte_for_byte() {
    let h = Harness::start().await;
    let chunks: Vec<Vec<u8>> = vec![
        b"PK\x03\x04".to_vec(),
        vec![0xAB; 4096],
        b"tail".to_vec(),
        vec![0x01; 37],
    ];
    let expected: Vec<u8> = chunks.concat();
    let total = expected.len();

    let stream = futures::stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
    );
    let response = h
        .client
        .post(h.url("/upload/myapp.jar"))
        .header(CONTENT_LENGTH, total)
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    let upload = h.stub.upload.lock().unwrap().clone().unwrap();
    assert_eq!(upload.0, "myapp.jar");
    assert_eq!(upload.1, expected);

    // The temp artifact is released once the transfer completes.
    assert_eq!(std::fs::read_dir(h.upload_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_backend_failure_surfaces_message_and_releases_sink() {
    let h = Harness::start().await;
    h.stub.fail_upload.store(true, Ordering::SeqCst);

    let response = h
        .client
        .post(h.url("/upload/myapp.jar"))
        .body(vec![0u8; 128])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Upload error: deploy rejected");
    assert_eq!(std::fs::read_dir(h.upload_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_without_content_length_is_rejected_locally() {
    use tower::ServiceExt;

    let h = Harness::start().await;
    let mut config = ProxyConfig::default();
    config.gateway.port = 1; // must never be contacted
    config.credential_path = h._workdir.path().join(".credential2");
    let app = router(AppState::new(config).unwrap());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/upload/myapp.jar")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_status_relays_parsed_json() {
    let h = Harness::start().await;
    let response = h.client.get(h.url("/upload/status")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let status: Value = response.json().await.unwrap();
    assert_eq!(status["status"], "DEPLOYED");
}

#[tokio::test]
async fn reset_forwards_as_delete() {
    let h = Harness::start().await;
    let response = h
        .client
        .post(h.url("/unrecoverable/reset"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
    assert_eq!(h.stub.reset_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn credential_roundtrip_and_environment() {
    let h = Harness::start().await;

    // No credential yet: destinations answers false without an
    // accounts call.
    let response = h.client.get(h.url("/destinations")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "false");

    let response = h
        .client
        .post(h.url("/credential"))
        .json(&json!({"api_key": "abc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "true");

    let environment: Value = h
        .client
        .get(h.url("/environment"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(environment["credential"], "abc");
    assert_eq!(environment["product_id"], "developer");

    let response = h.client.get(h.url("/destinations")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), r#"["vpc-abc"]"#);
}

#[tokio::test]
async fn destinations_reports_network_when_accounts_unreachable() {
    let h = Harness::start().await;

    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let workdir = tempfile::tempdir().unwrap();
    let mut config = ProxyConfig::default();
    config.accounts.host = "127.0.0.1".into();
    config.accounts.port = port;
    config.accounts.secure = false;
    config.credential_path = workdir.path().join(".credential");
    std::fs::write(&config.credential_path, "abc").unwrap();

    let proxy = spawn(router(AppState::new(config).unwrap())).await;
    let response = h
        .client
        .get(format!("http://{proxy}/destinations"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "network");
}
