//! User service entry point

use clap::Parser;
use flag_services::{serve, user_router, UserArgs, UserState};
use proxy_common::LoggingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = UserArgs::parse();

    proxy_common::init_logging(&LoggingConfig::default().with_json(args.json_logs))?;

    let addr = args.listen_addr()?;
    tracing::info!("Starting user service on {}", addr);

    serve(addr, user_router(UserState::new(args.flag))).await?;
    Ok(())
}
