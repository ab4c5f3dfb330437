//! Outbound side of the proxy: path rewriting, method dispatch,
//! archive upload streaming, and the metrics relay.

pub mod client;
pub mod metrics;
pub mod upload;
