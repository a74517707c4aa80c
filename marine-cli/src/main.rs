//! Binary crate for the `marine` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive provider configuration
//! - Human-friendly forecast output

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod output;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the real environment still applies.
    dotenvy::dotenv().ok();

    let cmd = cli::Cli::parse();
    init_tracing(cmd.verbose);
    cmd.run().await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
