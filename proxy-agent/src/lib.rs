//! Tunnel Agent
//!
//! Runs next to the services it exposes. Dials the tunnel relay, announces
//! its name, and opens upstream TCP connections whenever the relay asks.

use anyhow::Context;
use clap::Parser;
use std::time::Duration;

pub mod client;
pub use client::TunnelAgent;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Tunnel relay address (host:port)
    #[arg(long, env = "SERVER_ADDR")]
    pub server_addr: String,

    /// Name announced to the relay
    #[arg(long, env = "AGENT_NAME", default_value = "agent")]
    pub name: String,

    /// Redial with backoff when the relay connection drops
    #[arg(long)]
    pub reconnect: bool,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,
}

/// Upper bound for the reconnect backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub async fn run_agent(args: Args) -> anyhow::Result<()> {
    // Logging should be initialized by the caller (main or test)
    tracing::info!("Starting Tunnel Agent...");
    tracing::info!("  Relay: {}", args.server_addr);
    tracing::info!("  Name:  {}", args.name);

    let agent = TunnelAgent::new(args.server_addr.clone(), args.name.clone());
    if !args.reconnect {
        return agent
            .run()
            .await
            .with_context(|| format!("tunnel to {} failed", args.server_addr));
    }

    let mut attempt = 0u32;
    loop {
        match agent.run().await {
            Ok(()) => {
                tracing::warn!("Relay closed the tunnel, reconnecting...");
                attempt = 0;
            }
            Err(e) => {
                let delay = backoff(attempt);
                tracing::warn!("Tunnel failed: {:#}. Retrying in {:?}...", e, delay);
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.min(6))).min(MAX_BACKOFF)
}
