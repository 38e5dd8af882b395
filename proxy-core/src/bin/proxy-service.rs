//! HTTP relay entry point

use clap::Parser;
use proxy_common::LoggingConfig;
use proxy_core::{ProxyServer, ProxyServiceArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ProxyServiceArgs::parse();

    proxy_common::init_logging(&LoggingConfig::default().with_json(args.json_logs))?;

    let config = args.into_config()?;
    ProxyServer::new(config)?.run().await?;
    Ok(())
}
