//! Keyword-redacting TCP tunnel relay
//!
//! A single named agent dials in on the agent port and announces itself with
//! a newline-terminated name. Clients connecting to a forward port are
//! tunnelled over that connection to the agent's loopback interface.

pub mod agent;
pub mod forward;

pub use agent::{AgentHandle, AgentRegistry};
pub use forward::ForwardContext;

use crate::config::TunnelConfig;
use crate::error::ProxyError;
use crate::filter::KeywordFilter;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Longest name line accepted from an agent
pub const MAX_NAME_LEN: usize = 256;

pub struct TunnelRelay {
    config: TunnelConfig,
    registry: Arc<AgentRegistry>,
    filter: Arc<KeywordFilter>,
    shutdown: CancellationToken,
}

impl TunnelRelay {
    pub fn new(config: TunnelConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            filter: Arc::new(KeywordFilter::new(config.redact_keywords.clone())),
            registry: Arc::new(AgentRegistry::new(shutdown.clone())),
            config,
            shutdown,
        }
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    /// Cancelling this token stops the listeners and closes every agent
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured addresses and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let agent_listener = bind(self.config.agent_listen.to_string()).await?;
        let mut forwards = Vec::with_capacity(self.config.forwards.len());
        for forward in &self.config.forwards {
            forwards.push((bind(forward.listen.to_string()).await?, forward.target_port));
        }
        self.run_with_listeners(agent_listener, forwards).await
    }

    /// Serve on already-bound sockets; each forward is `(listener, target_port)`
    pub async fn run_with_listeners(
        self,
        agent_listener: TcpListener,
        forwards: Vec<(TcpListener, u16)>,
    ) -> Result<()> {
        info!(
            "Tunnel relay waiting for agent '{}' on {}",
            self.config.agent_name,
            agent_listener.local_addr()?
        );

        let ctx = ForwardContext {
            registry: self.registry.clone(),
            agent_name: self.config.agent_name.clone(),
            filter: self.filter.clone(),
            connect_timeout: self.config.connect_timeout,
        };
        for (listener, target_port) in forwards {
            info!(
                "Forwarding {} to agent port {}",
                listener.local_addr()?,
                target_port
            );
            tokio::spawn(forward::accept_clients(
                listener,
                target_port,
                ctx.clone(),
                self.shutdown.clone(),
            ));
        }

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = agent_listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };

            let registry = self.registry.clone();
            let expected = self.config.agent_name.clone();
            let timeout = self.config.registration_timeout;
            let ping_interval = self.config.ping_interval;
            tokio::spawn(async move {
                let mut stream = stream;
                match register_agent(&mut stream, &expected, timeout).await {
                    Ok(name) => {
                        info!("Agent {} connected from {}", name, peer);
                        agent::run_session(registry, stream, name, ping_interval).await;
                    }
                    Err(e) => warn!("Rejected agent connection from {}: {}", peer, e),
                }
            });
        }

        info!("Got exit signal. Shutting down.");
        Ok(())
    }
}

async fn bind(addr: String) -> Result<TcpListener> {
    TcpListener::bind(&addr)
        .await
        .map_err(|e| ProxyError::Network(format!("Failed to bind {}: {}", addr, e)))
}

/// Read the agent's name line and check it against `expected`
pub async fn register_agent(
    stream: &mut TcpStream,
    expected: &str,
    timeout: Duration,
) -> Result<String> {
    let raw = tokio::time::timeout(timeout, read_name_line(stream))
        .await
        .map_err(|_| {
            ProxyError::Network(format!("agent name not received within {:?}", timeout))
        })??;

    let name = raw.trim();
    if name.is_empty() {
        return Err(ProxyError::Configuration("empty agent name".to_string()));
    }
    if name != expected {
        return Err(ProxyError::Configuration(format!(
            "unexpected agent name '{}'",
            name
        )));
    }
    Ok(name.to_string())
}

// Byte at a time so nothing past the newline is consumed before framing starts.
async fn read_name_line(stream: &mut TcpStream) -> Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_NAME_LEN {
            return Err(ProxyError::Network("agent name line too long".to_string()));
        }
        line.push(byte);
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
