//! Proxy configuration with validation.
//!
//! Loaded once at startup; handlers see an immutable snapshot. The
//! gateway target is never mutated by the request pipeline.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Inbound HTTP server configuration
    pub server: ServerConfig,
    /// Gateway target the `/rest` surface forwards to
    pub gateway: BackendTarget,
    /// Accounts service used by `/destinations`
    pub accounts: AccountsConfig,
    /// Product metadata returned by `/environment`
    pub product: ProductConfig,
    /// Production mode: `/environment` returns cluster info instead of
    /// the cached credential
    pub production: bool,
    /// Cluster info exposed in production mode
    pub cluster: Option<serde_json::Value>,
    /// Path of the local credential file
    pub credential_path: PathBuf,
    /// Outbound call timeouts
    pub timeouts: TimeoutConfig,
    /// Upload sink configuration
    pub upload: UploadConfig,
    /// Vendor version-check endpoint (disabled when absent)
    pub version_check: Option<VersionCheckConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gateway: BackendTarget::default(),
            accounts: AccountsConfig::default(),
            product: ProductConfig::default(),
            production: false,
            cluster: None,
            credential_path: PathBuf::from(".credential"),
            timeouts: TimeoutConfig::default(),
            upload: UploadConfig::default(),
            version_check: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.host.is_empty() {
            return Err(ConfigError::Invalid("gateway host cannot be empty".into()));
        }
        if self.gateway.port == 0 {
            return Err(ConfigError::Invalid("gateway port cannot be 0".into()));
        }
        if self.gateway.api_version.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway api_version cannot be empty".into(),
            ));
        }
        if self.timeouts.gateway.as_millis() == 0 {
            return Err(ConfigError::InvalidTimeout(
                "gateway timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.accounts.as_millis() == 0 {
            return Err(ConfigError::InvalidTimeout(
                "accounts timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Get inbound server bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }
}

/// Inbound server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 9999)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 9999,
        }
    }
}

/// Gateway target: host, port, and the API version segment substituted
/// for the `/rest` prefix. Immutable snapshot per lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendTarget {
    /// Gateway host
    pub host: String,
    /// Gateway port (default: 10000)
    pub port: u16,
    /// Versioned API prefix, without slashes (default: "v2")
    pub api_version: String,
}

impl Default for BackendTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10000,
            api_version: "v2".to_string(),
        }
    }
}

impl BackendTarget {
    /// `host:port` authority string
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accounts service configuration for `/destinations`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Accounts host
    pub host: String,
    /// Accounts port
    pub port: u16,
    /// Use HTTPS for the accounts call
    pub secure: bool,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            host: "accounts.example.com".to_string(),
            port: 443,
            secure: true,
        }
    }
}

impl AccountsConfig {
    /// Base URL for the accounts service
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Product metadata for `/environment`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    /// Product identifier
    pub id: String,
    /// Human-readable product name
    pub name: String,
    /// Product version string ("UNKNOWN" when no version file exists)
    pub version: String,
    /// Address the console reports to clients
    pub ip: String,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            id: "developer".to_string(),
            name: "Console".to_string(),
            version: "UNKNOWN".to_string(),
            ip: "127.0.0.1".to_string(),
        }
    }
}

/// Outbound timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout for gateway calls
    #[serde(with = "humantime_serde")]
    pub gateway: Duration,
    /// Timeout for the accounts-service call
    #[serde(with = "humantime_serde")]
    pub accounts: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            gateway: Duration::from_secs(10),
            accounts: Duration::from_secs(10),
        }
    }
}

/// Upload sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory for upload temp files (system temp dir when absent)
    pub dir: Option<PathBuf>,
}

impl UploadConfig {
    /// Resolved sink directory
    pub fn sink_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Vendor version-check endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCheckConfig {
    /// Vendor host publishing the newest version string
    pub host: String,
    /// Vendor port
    pub port: u16,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("cannot read configuration: {0}")]
    Io(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
