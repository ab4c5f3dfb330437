//! Console proxy - thin HTTP layer between the browser console and the
//! clustered data-platform gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       CONSOLE PROXY                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  inbound request                                             │
//! │       │                                                      │
//! │  ┌────┴─────────┐   ┌────────────────┐   ┌───────────────┐  │
//! │  │ Path Rewriter │──│ Method         │──│ Streaming      │  │
//! │  │ /rest → /v2   │  │ Dispatcher     │  │ Upload Handler │  │
//! │  └──────────────┘   └───────┬────────┘   └───────┬───────┘  │
//! │                             │                    │          │
//! │                     ┌───────┴────────────────────┴───────┐  │
//! │                     │         Error Translator           │  │
//! │                     │  Transport / Backend / Parse /     │  │
//! │                     │  Validation → {result, error}      │  │
//! │                     └───────────────┬───────────────────-┘  │
//! └─────────────────────────────────────┼───────────────────────┘
//!                                       │
//!                              gateway <host>:<port>/<version>
//! ```
//!
//! The metrics relay and the credential store are independent paths
//! reachable directly from the dispatcher; everything else is forwarded
//! to the versioned gateway API and wrapped in the uniform
//! `{result, error}` envelope on failure.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod credential;
pub mod domain;
pub mod gateway;
pub mod service;

// Re-exports for public API
pub use credential::CredentialStore;
pub use domain::body::ForwardBody;
pub use domain::config::{BackendTarget, ConfigError, ProxyConfig};
pub use domain::error::{Envelope, ProxyError, ServerError, TransportCode};
pub use gateway::client::{GatewayClient, GatewayResponse};
pub use service::{router, serve, AppState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
