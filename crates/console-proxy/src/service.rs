//! HTTP surface of the console proxy.
//!
//! One asynchronous task per inbound request; the only state shared
//! across requests is the config snapshot and the credential cache,
//! both read-mostly. A client disconnect drops the handler future,
//! which aborts any in-flight outbound call and releases the upload
//! sink.

use crate::credential::CredentialStore;
use crate::domain::body::ForwardBody;
use crate::domain::config::ProxyConfig;
use crate::domain::error::{Envelope, ProxyError, ServerError, GATEWAY_SERVICE};
use crate::gateway::client::{GatewayClient, GatewayResponse, Verb};
use crate::gateway::metrics::{self, NO_PATHS_PROVIDED};
use crate::gateway::upload::{self, UploadJob};
use axum::{
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration snapshot
    pub config: Arc<ProxyConfig>,
    /// Gateway client for `/rest`, upload, and metrics forwards
    pub gateway: GatewayClient,
    /// Credential store for `/credential` and `/destinations`
    pub credentials: Arc<CredentialStore>,
    /// Client for non-gateway collaborators (accounts, version check),
    /// bounded by the configured accounts timeout
    external: reqwest::Client,
}

impl AppState {
    /// Validate the configuration and construct the shared state.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let gateway = GatewayClient::new(&config)?;
        let external = reqwest::Client::builder()
            .timeout(config.timeouts.accounts)
            .build()
            .map_err(|e| ServerError::Client(e.to_string()))?;
        let credentials = Arc::new(CredentialStore::new(&config.credential_path));
        Ok(Self {
            config: Arc::new(config),
            gateway,
            credentials,
            external,
        })
    }
}

/// Build the proxy router.
pub fn router(state: AppState) -> Router {
    let rest = get(rest_dispatch)
        .post(rest_dispatch)
        .put(rest_dispatch)
        .delete(rest_dispatch);

    Router::new()
        .route("/rest/*suffix", rest)
        .route("/metrics", post(relay_metrics))
        .route("/upload/status", get(upload_status))
        .route("/upload/:file", post(upload_archive))
        .route("/unrecoverable/reset", post(unrecoverable_reset))
        .route("/environment", get(environment))
        .route("/credential", post(save_credential))
        .route("/destinations", get(destinations))
        .route("/version", get(version_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(config: ProxyConfig) -> Result<(), ServerError> {
    let state = AppState::new(config)?;
    let addr = state.config.bind_addr();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(e.to_string()))?;
    info!(addr = %addr, "console proxy listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// `/rest/*` forwarding for GET, POST, PUT, and DELETE. Metrics
/// discovery paths under `/rest/metrics/` are answered here as well,
/// before the generic forward.
async fn rest_dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(suffix): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    if method == Method::GET {
        if let Some(trailing) = suffix.strip_prefix("metrics/user/") {
            return match metrics::discover_user_metrics(&state.gateway, trailing).await {
                Ok(envelope) => Json(envelope).into_response(),
                Err(err) => envelope_error_response(err),
            };
        }
        if let Some(entity) = suffix.strip_prefix("metrics/system/") {
            return match metrics::system_catalogue(entity) {
                Some(catalogue) => Json(catalogue).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            };
        }
    }

    let Some(verb) = method_verb(&method) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    // Only POST carries a body to the gateway.
    let forward_body = if method == Method::POST {
        ForwardBody::classify(body)
    } else {
        ForwardBody::Empty
    };

    match state
        .gateway
        .dispatch(verb, &suffix, query.as_deref(), forward_body, GATEWAY_SERVICE)
        .await
    {
        Ok(response) => passthrough(response),
        Err(err) => plain_error_response(err),
    }
}

/// `POST /metrics`: batched metric queries. An empty or absent path
/// list is a caller error and never reaches the gateway.
async fn relay_metrics(State(state): State<AppState>, body: Bytes) -> Response {
    let paths = match serde_json::from_slice::<Vec<String>>(&body) {
        Ok(paths) if !paths.is_empty() => paths,
        _ => {
            warn!("no paths posted to the metrics relay");
            return (StatusCode::BAD_REQUEST, Json(Envelope::fatal(NO_PATHS_PROVIDED)))
                .into_response();
        }
    };

    match metrics::relay(&state.gateway, &paths).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(err) => envelope_error_response(err),
    }
}

/// `POST /upload/:file`: stream an archive to durable temp storage,
/// then re-stream it to the gateway once the declared length is
/// satisfied.
async fn upload_archive(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let Some(declared) = declared else {
        warn!(archive = %file, "upload rejected: missing Content-Length");
        return (StatusCode::BAD_REQUEST, "Content-Length header is required").into_response();
    };

    let dir = state.config.upload.sink_dir();
    let mut job = match UploadJob::create(&dir, &file, declared).await {
        Ok(job) => job,
        Err(err) => return plain_error_response(err),
    };

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(archive = %file, error = %err, "upload body aborted");
                return (StatusCode::BAD_REQUEST, "upload body aborted").into_response();
            }
        };
        if let Err(err) = job.append(&chunk).await {
            return plain_error_response(err);
        }
    }

    if !job.is_complete() {
        warn!(
            archive = %file,
            received = job.received(),
            declared = job.declared_len(),
            "upload shorter than declared Content-Length"
        );
        return (
            StatusCode::BAD_REQUEST,
            "upload shorter than declared Content-Length",
        )
            .into_response();
    }

    match upload::deploy(&state.gateway, job).await {
        Ok(()) => "OK".into_response(),
        Err(ProxyError::Backend { body, .. }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Upload error: {}", String::from_utf8_lossy(&body)),
        )
            .into_response(),
        Err(err) => plain_error_response(err),
    }
}

/// `GET /upload/status`: relay the gateway's deploy status.
async fn upload_status(State(state): State<AppState>) -> Response {
    match state
        .gateway
        .dispatch(
            Verb::Get,
            upload::DEPLOY_STATUS_PATH,
            None,
            ForwardBody::Empty,
            GATEWAY_SERVICE,
        )
        .await
    {
        Ok(response) => match response.json() {
            Ok(value) => Json(value).into_response(),
            Err(_) => passthrough(response),
        },
        Err(err) => plain_error_response(err),
    }
}

/// `POST /unrecoverable/reset`: forwarded as DELETE to the gateway's
/// fixed reset path.
async fn unrecoverable_reset(State(state): State<AppState>) -> Response {
    match state
        .gateway
        .dispatch(
            Verb::Delete,
            "unrecoverable/reset",
            None,
            ForwardBody::Empty,
            GATEWAY_SERVICE,
        )
        .await
    {
        Ok(_) => "OK".into_response(),
        Err(err) => plain_error_response(err),
    }
}

/// `GET /environment`: product metadata, plus the cached credential
/// outside production mode or the configured cluster info in it.
async fn environment(State(state): State<AppState>) -> Json<serde_json::Value> {
    let product = &state.config.product;
    let mut env = json!({
        "product_id": product.id,
        "product_name": product.name,
        "version": product.version,
        "ip": product.ip,
    });

    if state.config.production {
        if let Some(cluster) = &state.config.cluster {
            env["cluster"] = cluster.clone();
        }
    } else {
        env["credential"] = match state.credentials.load().await {
            Ok(Some(key)) => json!(key),
            _ => serde_json::Value::Null,
        };
    }

    Json(env)
}

#[derive(Debug, Deserialize)]
struct CredentialRequest {
    api_key: String,
}

/// `POST /credential`: persist the API key; the cache is only updated
/// on a successful write.
async fn save_credential(
    State(state): State<AppState>,
    Json(request): Json<CredentialRequest>,
) -> Response {
    match state.credentials.save(&request.api_key).await {
        Ok(()) => "true".into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error: Could not write credentials file.",
        )
            .into_response(),
    }
}

/// `GET /destinations`: list push destinations from the accounts
/// service, keyed by the stored credential. No credential yet means
/// `false`; an unreachable accounts service means `network`.
async fn destinations(State(state): State<AppState>) -> Response {
    let key = match state.credentials.load().await {
        Ok(Some(key)) => key,
        Ok(None) => return "false".into_response(),
        Err(err) => {
            warn!(error = %err, "credential file read failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let url = format!(
        "{}/api/vpc/list/{}",
        state.config.accounts.base_url(),
        key.trim()
    );
    match state.external.get(&url).send().await {
        Ok(response) => match response.bytes().await {
            Ok(body) => body.into_response(),
            Err(err) => {
                warn!(error = %err, "accounts response aborted");
                "network".into_response()
            }
        },
        Err(err) => {
            warn!(error = %err, "accounts service unreachable");
            "network".into_response()
        }
    }
}

/// `GET /version`: own version plus the newest published one, when a
/// vendor endpoint is configured.
async fn version_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let current = state.config.product.version.clone();
    let newest = match &state.config.version_check {
        Some(vendor) => {
            let url = format!("http://{}:{}/version", vendor.host, vendor.port);
            match state.external.get(&url).send().await {
                Ok(response) => match response.text().await {
                    Ok(text) => text.replace('\n', ""),
                    Err(_) => "UNKNOWN".to_string(),
                },
                Err(err) => {
                    warn!(error = %err, "version check failed");
                    "UNKNOWN".to_string()
                }
            }
        }
        None => "UNKNOWN".to_string(),
    };
    Json(json!({ "current": current, "newest": newest }))
}

fn method_verb(method: &Method) -> Option<Verb> {
    match *method {
        Method::GET => Some(Verb::Get),
        Method::POST => Some(Verb::Post),
        Method::PUT => Some(Verb::Put),
        Method::DELETE => Some(Verb::Delete),
        _ => None,
    }
}

/// A 200 gateway response is passed back verbatim, content type
/// included.
fn passthrough(response: GatewayResponse) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(content_type) = response.content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    match builder.body(Body::from(response.body)) {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Error translation for endpoints that pass bodies through: transport
/// failures become the fatal envelope at 500 regardless of verb,
/// backend errors surface the backend's own body at 500.
fn plain_error_response(err: ProxyError) -> Response {
    match err {
        ProxyError::Transport { service, code } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Envelope::fatal(format!("{service}: {code}"))),
        )
            .into_response(),
        ProxyError::Backend { body, .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
        ProxyError::Parse { body } => (StatusCode::OK, body).into_response(),
        ProxyError::Validation(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

/// Error translation for envelope endpoints (metrics family).
fn envelope_error_response(err: ProxyError) -> Response {
    match err {
        ProxyError::Transport { service, code } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Envelope::fatal(format!("{service}: {code}"))),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Envelope::soft(json!(other.to_string()))),
        )
            .into_response(),
    }
}
