//! Error types for relay operations

use proxy_common::ProtocolError;
use std::fmt;

/// Main error type for relay operations
#[derive(Debug)]
pub enum ProxyError {
    /// Network-related errors
    Network(String),
    /// Configuration errors
    Configuration(String),
    /// Upstream HTTP errors
    Http(String),
    /// Tunnel framing errors
    Protocol(ProtocolError),
    /// No agent registered under the expected name
    AgentUnavailable(String),
    /// Agent answered a connect request with `Ok = false`
    ConnectRefused { port: u16 },
    /// Agent did not answer a connect request in time
    ConnectTimeout { port: u16 },
    /// General I/O errors
    Io(std::io::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Network(msg) => write!(f, "Network error: {}", msg),
            ProxyError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ProxyError::Http(msg) => write!(f, "HTTP error: {}", msg),
            ProxyError::Protocol(err) => write!(f, "Protocol error: {}", err),
            ProxyError::AgentUnavailable(name) => write!(f, "Agent is down: {}", name),
            ProxyError::ConnectRefused { port } => {
                write!(f, "Agent refused connection to port {}", port)
            }
            ProxyError::ConnectTimeout { port } => {
                write!(f, "Timeout waiting for ConnectResponse (port {})", port)
            }
            ProxyError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(err) => Some(err),
            ProxyError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err)
    }
}

impl From<ProtocolError> for ProxyError {
    fn from(err: ProtocolError) -> Self {
        ProxyError::Protocol(err)
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Http(err.to_string())
    }
}
