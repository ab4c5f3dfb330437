//! Console proxy binary.
//!
//! Startup sequence: initialize tracing, load configuration (path from
//! the first argument or `CONSOLE_PROXY_CONFIG`, defaults otherwise),
//! then bind and serve until ctrl-c.

use console_proxy::domain::config::ProxyConfig;
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONSOLE_PROXY_CONFIG").ok());

    let config = match config_path {
        Some(path) => match ProxyConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                error!(path = %path, error = %err, "cannot load configuration");
                std::process::exit(1);
            }
        },
        None => ProxyConfig::default(),
    };

    if let Err(err) = console_proxy::service::serve(config).await {
        error!(error = %err, "console proxy failed");
        std::process::exit(1);
    }
}
