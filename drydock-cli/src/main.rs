//! Drydock CLI
//!
//! Command-line interface for inspecting and nudging a running poller.

mod api;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Drydock image polling CLI", long_about = None)]
struct Cli {
    /// Poller debug API URL
    #[arg(long, env = "DRYDOCK_URL", default_value = "http://localhost:8090")]
    poller_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        poller_url: cli.poller_url,
    };

    handle_command(cli.command, &config).await
}
