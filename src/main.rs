use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

mod inspect;
mod output;
mod pipeline;
mod profile;
mod telemetry;

#[derive(Parser)]
#[command(name = "batch-scraper", about = "Bounded-concurrency batch page scraper")]
struct Cli {
    /// Emit a single JSON envelope to stdout; logs go to stderr
    #[arg(global = true, long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan or execute a scrape (execute with --apply)
    Run(pipeline::RunCmd),
    /// Built-in site profiles
    Profiles(profile::ProfilesCmd),
    /// Apply a profile to a saved page
    Inspect(inspect::InspectCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::config::set_json_mode(cli.json);

    // initialize logging/tracing (stderr). Respect RUST_LOG, SCRAPE_LOG_FORMAT and SCRAPE_LOG_FILE
    let _log_guard = telemetry::config::init_tracing();

    let res = match cli.command {
        Commands::Run(args) => pipeline::run(args).await,
        Commands::Profiles(args) => profile::run(args).await,
        Commands::Inspect(args) => inspect::run(args).await,
    };
    if let Err(e) = &res {
        tracing::error!(error = %format!("{:#}", e), "command failed");
    }
    res
}
