//! Metrics relay and metrics discovery.
//!
//! A batch of metric query paths is forwarded as one POST to the
//! gateway's fixed `/metrics` path. Malformed upstream data is a soft
//! condition: the console gets `"Parsing Error"` at 200 rather than a
//! fatal envelope.

use crate::domain::error::{Envelope, ProxyError, METRICS_SERVICE, USER_METRICS_SERVICE};
use crate::gateway::client::GatewayClient;
use bytes::Bytes;
use serde_json::json;
use tracing::warn;

/// Fixed unversioned gateway path for batched metric queries
pub const METRICS_PATH: &str = "/metrics";

/// Fixed unversioned gateway prefix for user-metrics discovery
pub const METRICS_AVAILABLE_PREFIX: &str = "/metrics/available";

/// Fatal message for an empty or absent path list
pub const NO_PATHS_PROVIDED: &str = "MetricsService: No paths provided.";

/// Forward a non-empty batch of metric paths. The caller guarantees
/// the list is non-empty; the empty case is rejected before any
/// outbound call is made.
pub async fn relay(client: &GatewayClient, paths: &[String]) -> Result<Envelope, ProxyError> {
    debug_assert!(!paths.is_empty());
    // Plain string lists always serialize.
    let content = serde_json::to_vec(paths).unwrap_or_default();
    let response = client
        .post_unversioned(METRICS_PATH, Bytes::from(content), METRICS_SERVICE)
        .await?;

    match response.json() {
        Ok(value) => Ok(Envelope::ok(value)),
        Err(_) => {
            warn!(
                body = %String::from_utf8_lossy(&response.body),
                "metrics response was not valid JSON"
            );
            Ok(Envelope::soft(json!("Parsing Error")))
        }
    }
}

/// Discover available user metrics under a trailing query path. On
/// parse failure the raw gateway body rides in the error slot, the
/// shape the console renders for this endpoint.
pub async fn discover_user_metrics(
    client: &GatewayClient,
    trailing: &str,
) -> Result<Envelope, ProxyError> {
    let path = format!(
        "{}/{}",
        METRICS_AVAILABLE_PREFIX,
        trailing.trim_start_matches('/')
    );
    let response = client.get_unversioned(&path, USER_METRICS_SERVICE).await?;

    match response.json() {
        Ok(value) => Ok(Envelope::ok(value)),
        Err(_) => {
            warn!(path = %path, "user metrics response was not valid JSON");
            Ok(Envelope::soft(json!(
                String::from_utf8_lossy(&response.body).into_owned()
            )))
        }
    }
}

/// Static catalogue of well-known system metrics per entity type,
/// served locally without a gateway round-trip.
pub fn system_catalogue(entity: &str) -> Option<serde_json::Value> {
    let catalogue = match entity {
        "App" => json!([
            { "name": "Events Collected", "path": "/platform/apps/{id}/collect.events" },
            { "name": "Busyness", "path": "/platform/apps/{id}/process.busyness" },
            { "name": "Bytes Stored", "path": "/platform/apps/{id}/store.bytes" },
            { "name": "Queries Served", "path": "/platform/apps/{id}/query.requests" }
        ]),
        "Stream" => json!([
            { "name": "Events Collected", "path": "/platform/streams/{id}/collect.events" },
            { "name": "Bytes Collected", "path": "/platform/streams/{id}/collect.bytes" },
            { "name": "Reads per Second", "path": "/platform/streams/{id}/collect.reads" }
        ]),
        "Flow" => json!([
            { "name": "Busyness", "path": "/platform/apps/{parent}/flows/{id}/process.busyness" },
            { "name": "Events Processed", "path": "/platform/apps/{parent}/flows/{id}/process.events.processed" },
            { "name": "Bytes Processed", "path": "/platform/apps/{parent}/flows/{id}/process.bytes" },
            { "name": "Errors per Second", "path": "/platform/apps/{parent}/flows/{id}/process.errors" }
        ]),
        "Batch" => json!([
            { "name": "Completion", "path": "/platform/apps/{parent}/mapreduce/{id}/process.completion" },
            { "name": "Records Processed", "path": "/platform/apps/{parent}/mapreduce/{id}/process.entries" }
        ]),
        "Dataset" => json!([
            { "name": "Bytes per Second", "path": "/platform/datasets/{id}/store.bytes" },
            { "name": "Reads per Second", "path": "/platform/datasets/{id}/store.reads" }
        ]),
        "Procedure" => json!([
            { "name": "Requests per Second", "path": "/platform/apps/{parent}/procedures/{id}/query.requests" },
            { "name": "Failures per Second", "path": "/platform/apps/{parent}/procedures/{id}/query.failures" }
        ]),
        _ => return None,
    };
    Some(catalogue)
}
