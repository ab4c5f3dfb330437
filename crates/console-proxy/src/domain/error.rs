//! Error taxonomy and the uniform `{result, error}` envelope.
//!
//! Every outbound-call outcome is classified into exactly one of four
//! kinds. Connectivity problems are operator-actionable and marked
//! fatal; backend-reported errors are passed through transparently for
//! the console to render; payload malformation is a soft condition.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service name used in fatal envelopes for `/rest` forwards
pub const GATEWAY_SERVICE: &str = "GatewayService";
/// Service name used in fatal envelopes for the metrics relay
pub const METRICS_SERVICE: &str = "MetricsService";
/// Service name used in fatal envelopes for user-metrics discovery
pub const USER_METRICS_SERVICE: &str = "UserMetricsService";
/// Service name used when the upload sink itself fails
pub const UPLOAD_SERVICE: &str = "UploadService";

/// Errno-style transport failure code surfaced to the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCode {
    /// Connection refused by the target
    ConnRefused,
    /// Outbound call exceeded its timeout and was aborted
    TimedOut,
    /// Connection reset mid-flight
    ConnReset,
    /// Any other I/O failure
    Io,
}

impl TransportCode {
    /// Code string the browser client already understands
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::ConnRefused => "ECONNREFUSED",
            TransportCode::TimedOut => "ETIMEDOUT",
            TransportCode::ConnReset => "ECONNRESET",
            TransportCode::Io => "EIO",
        }
    }

    /// Classify an outbound client error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportCode::TimedOut;
        }
        // Walk the source chain looking for the underlying I/O error.
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                return TransportCode::from_io_kind(io.kind());
            }
            source = cause.source();
        }
        if err.is_connect() {
            TransportCode::ConnRefused
        } else {
            TransportCode::Io
        }
    }

    /// Classify a local I/O error kind.
    pub fn from_io_kind(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::ConnectionRefused => TransportCode::ConnRefused,
            std::io::ErrorKind::TimedOut => TransportCode::TimedOut,
            std::io::ErrorKind::ConnectionReset => TransportCode::ConnReset,
            _ => TransportCode::Io,
        }
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request proxy error
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Gateway unreachable or call aborted: always fatal, HTTP 500
    #[error("{service}: {code}")]
    Transport {
        /// Originating service name
        service: &'static str,
        /// Errno-style refusal code
        code: TransportCode,
    },

    /// Gateway reachable but returned non-200: its body is surfaced
    /// verbatim at HTTP 500
    #[error("backend returned {status} for {path}")]
    Backend {
        /// Backend status code
        status: u16,
        /// Raw backend body
        body: Bytes,
        /// Rewritten path that was attempted
        path: String,
    },

    /// Response body expected to be JSON but was not: soft, HTTP 200
    #[error("Parsing Error")]
    Parse {
        /// The unparseable body
        body: Bytes,
    },

    /// Rejected before any outbound call
    #[error("{0}")]
    Validation(String),
}

impl ProxyError {
    /// Transport failure attributed to `service`.
    pub fn transport(service: &'static str, err: &reqwest::Error) -> Self {
        ProxyError::Transport {
            service,
            code: TransportCode::from_reqwest(err),
        }
    }
}

/// Uniform `{result, error}` wrapper for proxied JSON endpoints.
///
/// Invariant: exactly one of `result` / `error` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Parsed backend value, when the call succeeded
    pub result: Option<serde_json::Value>,
    /// Error value, when it did not
    pub error: Option<serde_json::Value>,
}

impl Envelope {
    /// Successful envelope
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    /// Fatal error envelope, `{error: {fatal: <message>}}`
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(serde_json::json!({ "fatal": message.into() })),
        }
    }

    /// Soft error envelope carrying a plain error value
    pub fn soft(error: serde_json::Value) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }
}

/// Startup-level errors (not per-request)
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Outbound client construction error
    #[error("client error: {0}")]
    Client(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
