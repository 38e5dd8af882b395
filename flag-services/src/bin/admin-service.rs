//! Admin service entry point

use clap::Parser;
use flag_services::{admin_router, serve, AdminArgs, AdminState};
use proxy_common::LoggingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AdminArgs::parse();

    proxy_common::init_logging(&LoggingConfig::default().with_json(args.json_logs))?;

    let addr = args.listen_addr()?;
    tracing::info!("Starting admin service on {}", addr);

    serve(addr, admin_router(AdminState::new(args.flag))).await?;
    Ok(())
}
