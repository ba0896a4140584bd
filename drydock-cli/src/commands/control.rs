//! Control command handlers
//!
//! Manual levers on a running poller.

use anyhow::Result;
use colored::*;

use super::status::format_interval;
use crate::api::ApiClient;

pub async fn reschedule(client: &ApiClient) -> Result<()> {
    let response = client.reschedule().await?;
    print_tick(response.tick_interval_secs);
    Ok(())
}

pub async fn tick(client: &ApiClient) -> Result<()> {
    let response = client.tick().await?;

    if response.submitted == 0 {
        println!("{}", "Nothing was due.".yellow());
    } else {
        println!(
            "{} Submitted {} poll task(s)",
            "✓".green().bold(),
            response.submitted
        );
    }

    Ok(())
}

pub async fn forget(client: &ApiClient, workload: &str) -> Result<()> {
    let response = client.remove_entry(workload).await?;

    if response.removed {
        println!(
            "{} Removed schedule entry for {}",
            "✓".green().bold(),
            workload.bold()
        );
    } else if response.reset {
        println!(
            "{} Reset schedule entry for {} (its polling override is still enabled)",
            "✓".green().bold(),
            workload.bold()
        );
    } else {
        println!(
            "{}",
            format!("Workload {} had no schedule entry.", workload).yellow()
        );
    }
    print_tick(response.tick_interval_secs);

    Ok(())
}

fn print_tick(interval_secs: Option<u64>) {
    match interval_secs {
        Some(secs) => println!(
            "{} Polling every {}",
            "✓".green().bold(),
            format_interval(secs).bold()
        ),
        None => println!("{}", "Polling is disabled everywhere.".yellow()),
    }
}
