//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod control;
mod status;

use anyhow::Result;
use clap::Subcommand;

use crate::api::ApiClient;
use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show poller health and a polling summary
    Status,
    /// List schedule entries, next due first
    Entries,
    /// Show digest cache statistics
    Cache {
        /// Forget every cached digest
        #[arg(long)]
        clear: bool,
    },
    /// Re-derive polling intervals from the current settings
    Reschedule,
    /// Poll every due entry now
    Tick,
    /// Drop the schedule entry of a workload that no longer exists
    Forget {
        /// Workload id
        workload: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.poller_url);

    match command {
        Commands::Status => status::show_status(&client).await,
        Commands::Entries => status::list_entries(&client).await,
        Commands::Cache { clear } => status::show_cache(&client, clear).await,
        Commands::Reschedule => control::reschedule(&client).await,
        Commands::Tick => control::tick(&client).await,
        Commands::Forget { workload } => control::forget(&client, &workload).await,
    }
}
