use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gains_config::DEFAULT_CONFIG_PATH;
use gains_db::LedgerStore;

mod commands;

use commands::import_1099;

#[derive(Parser)]
#[command(name = "gains")]
#[command(about = "Realized capital-gains ledger operator CLI", long_about = None)]
struct Cli {
    /// Config file (app credentials, tokens, fallback DB connection string).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Interactive OAuth authorization; writes fresh tokens to the config file.
    Authorize,

    /// Print realized gains for one tax year, or all years plus lifetime total.
    Balance {
        #[arg(long)]
        account: i64,

        #[arg(long)]
        year: Option<i32>,
    },

    /// Import a realized-gains CSV into the balances (once per file).
    #[command(name = "import-1099")]
    Import1099 {
        #[arg(long)]
        account: i64,

        #[arg(long)]
        path: PathBuf,

        /// Parse and print the per-year totals without touching the database.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply embedded SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = commands::connect(&cli.config).await?;
            match cmd {
                DbCmd::Status => {
                    let s = gains_db::status(&pool).await?;
                    println!("db_ok={} has_fills_table={}", s.ok, s.has_fills_table);
                }
                DbCmd::Migrate => {
                    gains_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Authorize => commands::authorize::run(&cli.config).await?,

        Commands::Balance { account, year } => {
            let store = commands::open_store(&cli.config).await?;
            commands::balance::run(&store, account, year).await?;
        }

        Commands::Import1099 {
            account,
            path,
            dry_run,
        } => {
            let bytes =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = import_1099::parse_realized_gains(&bytes)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            println!("{parsed}");

            if dry_run {
                println!("dry_run=true");
                return Ok(());
            }

            let store = commands::open_store(&cli.config).await?;
            let applied = store.record_import(&parsed.into_record(account)).await?;
            if applied {
                println!("imported=true account={account}");
            } else {
                println!("imported=false account={account} reason=already_imported");
            }
        }
    }

    Ok(())
}
