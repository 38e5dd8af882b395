//! Shared harness for the cross-crate tests in `tests/`

use axum::Router;
use flag_services::{admin_router, user_router, AdminState, UserState};
use proxy_agent::TunnelAgent;
use proxy_core::{AgentRegistry, TunnelConfig, TunnelRelay};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const USER_FLAG: &str = "crew{fake_user_flag}";
pub const ADMIN_FLAG: &str = "crew{fake_admin_flag}";

/// Serve `app` on an ephemeral loopback port
pub async fn spawn_app(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("test server failed: {}", e);
        }
    });
    Ok(addr)
}

pub async fn spawn_user_service() -> anyhow::Result<SocketAddr> {
    spawn_app(user_router(UserState::new(USER_FLAG))).await
}

pub async fn spawn_admin_service() -> anyhow::Result<SocketAddr> {
    spawn_app(admin_router(AdminState::new(ADMIN_FLAG))).await
}

/// A running relay with one forward port and a connected agent
pub struct Tunnel {
    /// Where clients connect
    pub client_addr: SocketAddr,
    pub registry: Arc<AgentRegistry>,
}

/// Start a relay forwarding a fresh port to `target_port` on the agent's
/// loopback, start an agent against it, and wait for registration.
pub async fn spawn_tunnel(target_port: u16) -> anyhow::Result<Tunnel> {
    let agent_listener = TcpListener::bind("127.0.0.1:0").await?;
    let client_listener = TcpListener::bind("127.0.0.1:0").await?;
    let agent_addr = agent_listener.local_addr()?;
    let client_addr = client_listener.local_addr()?;

    let relay = TunnelRelay::new(TunnelConfig::default());
    let registry = relay.registry();
    tokio::spawn(relay.run_with_listeners(agent_listener, vec![(client_listener, target_port)]));

    let agent = TunnelAgent::new(agent_addr.to_string(), "agent".to_string());
    tokio::spawn(async move {
        if let Err(e) = agent.run().await {
            tracing::error!("test agent failed: {:#}", e);
        }
    });

    for _ in 0..200 {
        if registry.get("agent").is_some() {
            return Ok(Tunnel {
                client_addr,
                registry,
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("agent never registered")
}
