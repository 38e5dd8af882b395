//! Flag services for the proxies challenge
//!
//! The admin service always hands out FLAG2. The user service only hands out
//! FLAG1 when a POST body carries the trigger phrase, after transparently
//! inflating gzip/deflate request bodies.

pub mod admin;
pub mod config;
pub mod decompress;
pub mod error;
pub mod user;

pub use admin::{admin_router, AdminState};
pub use config::{AdminArgs, UserArgs};
pub use decompress::{decode_body, BodyEncoding, DecompressError};
pub use error::ServiceError;
pub use user::{user_router, UserState, TRIGGER_PHRASE};

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Bind `addr` and serve `app` until Ctrl-C
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::Bind { addr, source })?;
    info!("Listening on {}", addr);
    serve_on(listener, app).await
}

/// Serve `app` on an already bound listener until Ctrl-C
pub async fn serve_on(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServiceError::Serve)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received, stopping service...");
    }
}
