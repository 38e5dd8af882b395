//! Race runner entry point

use anyhow::Context;
use attack_engine::{RacePlan, RaceRunner, ReqwestExecutor, SessionConfusion};
use clap::{Args, Parser, Subcommand};
use proxy_common::LoggingConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Per-request timeout in seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    /// Print the full report as JSON instead of `<label> <body>` lines
    #[arg(long)]
    json: bool,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a plan described in a TOML file
    Plan {
        /// Path to the plan file
        file: PathBuf,
    },
    /// Build and run the session-confusion race
    SessionConfusion(SessionConfusionArgs),
}

#[derive(Args, Debug)]
struct SessionConfusionArgs {
    #[arg(long, env = "TARGET_URL")]
    base_url: String,
    #[arg(long)]
    session_id: String,
    #[arg(long)]
    user_id: String,
    /// Value of the `session` cookie
    #[arg(long, env = "SESSION_COOKIE")]
    cookie: String,
    #[arg(long)]
    payload: String,
    /// Percent-encode punctuation and whitespace in the payload
    #[arg(long)]
    url_encode: bool,
    #[arg(long, default_value_t = 100)]
    prime_delay_ms: u64,
    #[arg(long, default_value_t = 5_000)]
    inject_delay_ms: u64,
    #[arg(long, default_value_t = 100)]
    report_delay_ms: u64,
    #[arg(long, default_value_t = 10_000)]
    settle_ms: u64,
}

impl SessionConfusionArgs {
    fn into_plan(self) -> RacePlan {
        let mut attack =
            SessionConfusion::new(self.session_id, self.user_id, self.cookie, self.payload);
        attack.url_encode_payload = self.url_encode;
        attack.prime_delay_ms = self.prime_delay_ms;
        attack.inject_delay_ms = self.inject_delay_ms;
        attack.report_delay_ms = self.report_delay_ms;
        attack.settle_ms = self.settle_ms;
        attack.build(self.base_url)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    proxy_common::init_logging(&LoggingConfig::default().with_json(cli.json_logs))?;

    let plan = match cli.command {
        Command::Plan { file } => RacePlan::from_file(&file)
            .with_context(|| format!("Failed to load plan {}", file.display()))?,
        Command::SessionConfusion(args) => args.into_plan(),
    };

    let timeout = (cli.request_timeout > 0).then(|| Duration::from_secs(cli.request_timeout));
    let runner = RaceRunner::new(Arc::new(ReqwestExecutor::new(timeout)?));
    let report = runner.run(&plan).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &report.results {
            println!("{}", result.summary_line());
        }
    }
    Ok(())
}
