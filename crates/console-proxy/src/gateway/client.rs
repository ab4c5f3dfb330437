//! Gateway client: path rewriting and method dispatch.
//!
//! The dispatcher makes exactly one outbound attempt per inbound
//! request and only distinguishes 200 from non-200; everything else is
//! the error translator's business.

use crate::domain::body::ForwardBody;
use crate::domain::config::{BackendTarget, ProxyConfig};
use crate::domain::error::{ProxyError, ServerError};
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::time::Duration;
use tracing::error;

/// Supported forwarding verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    /// Outbound method for this verb; inbound and outbound verbs are
    /// always identical.
    pub fn as_method(&self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Response snapshot from an outbound call
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// Backend status code
    pub status: u16,
    /// Backend content type, when present
    pub content_type: Option<String>,
    /// Backend body, untouched
    pub body: Bytes,
}

impl GatewayResponse {
    /// Parse the body as JSON; malformed data is a soft condition.
    pub fn json(&self) -> Result<serde_json::Value, ProxyError> {
        serde_json::from_slice(&self.body).map_err(|_| ProxyError::Parse {
            body: self.body.clone(),
        })
    }
}

/// Client for the clustered gateway. Cheap to clone; one instance is
/// shared by every request task.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    target: BackendTarget,
    timeout: Duration,
}

impl GatewayClient {
    /// Build a client from the loaded configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ServerError::Client(e.to_string()))?;
        Ok(Self {
            http,
            target: config.gateway.clone(),
            timeout: config.timeouts.gateway,
        })
    }

    /// Rewrite a `/rest/<suffix>` path into the backend-absolute URL:
    /// the `/rest` prefix becomes `/<api-version>` and the gateway
    /// authority is prepended.
    pub fn rewrite(&self, suffix: &str, query: Option<&str>) -> String {
        let mut url = format!(
            "http://{}/{}/{}",
            self.target.authority(),
            self.target.api_version,
            suffix.trim_start_matches('/'),
        );
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Backend-absolute URL for a fixed unversioned path (`/metrics`).
    pub fn unversioned(&self, path: &str) -> String {
        format!("http://{}{}", self.target.authority(), path)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward a `/rest` call. A 200 response is returned verbatim;
    /// any other status becomes a backend error carrying the raw body
    /// and the path attempted.
    pub async fn dispatch(
        &self,
        verb: Verb,
        suffix: &str,
        query: Option<&str>,
        body: ForwardBody,
        service: &'static str,
    ) -> Result<GatewayResponse, ProxyError> {
        let url = self.rewrite(suffix, query);
        let response = self.send(verb, &url, body, service).await?;
        if response.status == 200 {
            Ok(response)
        } else {
            error!(path = %url, status = response.status, "gateway call failed");
            Err(ProxyError::Backend {
                status: response.status,
                body: response.body,
                path: url,
            })
        }
    }

    /// GET a fixed unversioned backend path.
    pub async fn get_unversioned(
        &self,
        path: &str,
        service: &'static str,
    ) -> Result<GatewayResponse, ProxyError> {
        let url = self.unversioned(path);
        self.send(Verb::Get, &url, ForwardBody::Empty, service).await
    }

    /// POST a pre-serialized payload to a fixed unversioned backend
    /// path, with an explicit content length.
    pub async fn post_unversioned(
        &self,
        path: &str,
        content: Bytes,
        service: &'static str,
    ) -> Result<GatewayResponse, ProxyError> {
        let url = self.unversioned(path);
        let request = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, content.len())
            .body(content);
        self.execute(request, &url, service).await
    }

    async fn send(
        &self,
        verb: Verb,
        url: &str,
        body: ForwardBody,
        service: &'static str,
    ) -> Result<GatewayResponse, ProxyError> {
        let mut request = self.http.request(verb.as_method(), url).timeout(self.timeout);
        let is_json = body.is_json();
        if let Some(bytes) = body.into_bytes() {
            if is_json {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(bytes);
        }
        self.execute(request, url, service).await
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        service: &'static str,
    ) -> Result<GatewayResponse, ProxyError> {
        let response = request.send().await.map_err(|e| {
            let err = ProxyError::transport(service, &e);
            error!(path = %url, error = %err, "gateway unreachable");
            err
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::transport(service, &e))?;
        Ok(GatewayResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ProxyConfig;

    fn client() -> GatewayClient {
        let mut config = ProxyConfig::default();
        config.gateway.host = "gateway.local".into();
        config.gateway.port = 10000;
        config.gateway.api_version = "v2".into();
        GatewayClient::new(&config).unwrap()
    }

    #[test]
    fn test_rewrite_substitutes_prefix() {
        let url = client().rewrite("apps/purchase/flows", None);
        assert_eq!(url, "http://gateway.local:10000/v2/apps/purchase/flows");
    }

    #[test]
    fn test_rewrite_keeps_query() {
        let url = client().rewrite("apps", Some("status=RUNNING"));
        assert_eq!(url, "http://gateway.local:10000/v2/apps?status=RUNNING");
    }

    #[test]
    fn test_rewrite_tolerates_leading_slash() {
        let url = client().rewrite("/apps", None);
        assert_eq!(url, "http://gateway.local:10000/v2/apps");
    }

    #[test]
    fn test_unversioned_path() {
        let url = client().unversioned("/metrics");
        assert_eq!(url, "http://gateway.local:10000/metrics");
    }

    #[test]
    fn test_verb_mapping_is_identity() {
        assert_eq!(Verb::Get.as_method(), reqwest::Method::GET);
        assert_eq!(Verb::Delete.as_method(), reqwest::Method::DELETE);
    }
}
