//! Error types for the flag services

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Invalid listen address: {0}")]
    Address(String),

    #[error(transparent)]
    Logging(#[from] proxy_common::logging::LoggingError),
}
