//! Status command handlers
//!
//! Read-only views of the poller: health, schedule entries and the digest
//! cache.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use drydock_core::domain::cache::CacheStats;
use drydock_core::dto::health::{HealthReport, HealthStatus};
use drydock_core::dto::polling::EntrySummary;

use crate::api::ApiClient;

/// Show health and a summary of the polling engine
pub async fn show_status(client: &ApiClient) -> Result<()> {
    let snapshot = client.snapshot().await?;

    print_health(&snapshot.health);
    println!();
    println!(
        "  Tick:         {}",
        snapshot
            .tick_interval_secs
            .map(format_interval)
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!("  Entries:      {}", snapshot.scheduler_size);
    println!(
        "  Queue:        {}/{}",
        snapshot.queue_size, snapshot.queue_capacity
    );
    println!("  Coalescing:   {} lookup(s)", snapshot.coalesced_in_flight);
    println!(
        "  Cache:        {}/{} ({:.0}% hit rate)",
        snapshot.cache.size,
        snapshot.cache.max_size,
        snapshot.cache.hit_rate() * 100.0
    );

    Ok(())
}

/// List schedule entries
pub async fn list_entries(client: &ApiClient) -> Result<()> {
    let snapshot = client.snapshot().await?;

    if snapshot.entries.is_empty() {
        println!("{}", "No schedule entries.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} schedule entries:", snapshot.entries.len()).bold()
    );
    println!();
    for entry in &snapshot.entries {
        print_entry(entry, snapshot.generated_at);
    }

    Ok(())
}

/// Show cache statistics, optionally clearing the cache first
pub async fn show_cache(client: &ApiClient, clear: bool) -> Result<()> {
    if clear {
        client.clear_cache().await?;
        println!("{} Digest cache cleared", "✓".green().bold());
    }

    let snapshot = client.snapshot().await?;
    print_cache(&snapshot.cache);

    Ok(())
}

fn print_health(report: &HealthReport) {
    println!("Poller is {}", colorize_health(report.status));
    for reason in &report.reasons {
        println!("  {} {}", "!".yellow(), reason);
    }
}

fn print_entry(entry: &EntrySummary, now: DateTime<Utc>) {
    let state = if entry.in_flight {
        "polling".cyan()
    } else if entry.consecutive_failures > 0 {
        format!("failing ({})", entry.consecutive_failures).red()
    } else {
        "idle".green()
    };

    println!("  {} {}", "▸".cyan(), entry.target.to_string().bold());
    println!("    State:        {}", state);
    println!("    Interval:     {}", format_interval(entry.interval_secs));
    println!(
        "    Next Poll:    {}",
        format_relative(entry.next_poll_time, now).dimmed()
    );
    if let Some(last) = entry.last_poll_time {
        let took = entry
            .last_poll_duration_ms
            .map(|ms| format!(" (took {} ms)", ms))
            .unwrap_or_default();
        println!(
            "    Last Poll:    {}{}",
            last.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            took
        );
    }
    if let Some(error) = &entry.last_error {
        println!("    Last Error:   {}", error.red());
    }
    println!();
}

fn print_cache(stats: &CacheStats) {
    println!("{}", "Digest cache".bold());
    println!("  Size:         {}/{}", stats.size, stats.max_size);
    println!("  Hits:         {}", stats.hits);
    println!("  Misses:       {}", stats.misses);
    println!("  Evictions:    {}", stats.evictions);
    println!("  Hit Rate:     {:.1}%", stats.hit_rate() * 100.0);
}

fn colorize_health(status: HealthStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        HealthStatus::Healthy => label.green(),
        HealthStatus::Warning => label.yellow(),
        HealthStatus::Degraded => label.truecolor(255, 140, 0),
        HealthStatus::Unhealthy => label.red(),
    }
}

/// Renders seconds as the largest whole unit ("10m", "1h", "90s")
pub fn format_interval(secs: u64) -> String {
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = at - now;
    let secs = delta.num_seconds();
    if secs <= 0 {
        "due now".to_string()
    } else {
        format!("in {}", format_interval(secs as u64))
    }
}
