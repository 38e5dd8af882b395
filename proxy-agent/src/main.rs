//! Tunnel Agent Binary Entry Point

use clap::Parser;
use proxy_agent::{run_agent, Args};
use proxy_common::LoggingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    proxy_common::init_logging(&LoggingConfig::default().with_json(args.json_logs))?;

    tokio::select! {
        result = run_agent(args) => {
            if let Err(e) = result {
                tracing::error!("Agent failed: {:#}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping agent...");
        }
    }

    Ok(())
}
