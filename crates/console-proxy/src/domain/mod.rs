//! Domain types: configuration, error taxonomy, request-body envelope.

pub mod body;
pub mod config;
pub mod error;
