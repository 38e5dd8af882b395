//! Proxy Core Library
//!
//! The two relays standing between players and the flag services: an HTTP
//! reverse proxy in front of the user service, and a TCP tunnel relay that
//! reaches services through a dialled-in agent while masking keywords in the
//! client's traffic.

pub mod admin;
pub mod controller;
pub mod filter;
/// HTTP reverse proxy
pub mod proxy;
/// Agent tunnel relay
pub mod tunnel;

/// Configuration types and utilities
pub mod config;

/// Error types for relay operations
pub mod error;

pub use admin::{AdminProbe, AdminStatus};
pub use config::{PortForward, ProxyServiceArgs, RelayConfig, TunnelConfig, TunnelRelayArgs};
pub use controller::{ConnectController, ConnectOutcome};
pub use error::ProxyError;
pub use filter::KeywordFilter;
/// Re-export commonly used types
pub use proxy::ProxyServer;
pub use tunnel::{AgentRegistry, TunnelRelay};

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, ProxyError>;
