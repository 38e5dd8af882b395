//! Tunnel relay entry point

use clap::Parser;
use proxy_common::LoggingConfig;
use proxy_core::{TunnelRelay, TunnelRelayArgs};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TunnelRelayArgs::parse();

    proxy_common::init_logging(&LoggingConfig::default().with_json(args.json_logs))?;

    let config = args.into_config();
    if config.forwards.is_empty() {
        warn!("No forward ports configured; only agent registration will be served");
    }

    let relay = TunnelRelay::new(config);
    let shutdown = relay.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
        }
        shutdown.cancel();
    });

    relay.run().await?;
    Ok(())
}
