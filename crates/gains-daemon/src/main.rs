//! gains-daemon entry point.
//!
//! Thin: loads `.env.local`, sets up tracing, parses the command line and
//! hands over to `service::run_service`.

use std::path::PathBuf;

use clap::Parser;
use gains_config::DEFAULT_CONFIG_PATH;
use gains_daemon::service;

#[derive(Parser)]
#[command(name = "gains-daemon")]
#[command(about = "Realized capital-gains ledger service", long_about = None)]
struct Args {
    /// Path to the JSON config file holding app credentials and tokens.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let args = Args::parse();
    service::run_service(&args.config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
