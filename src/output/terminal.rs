// Colored terminal output for account lists, scrape outcomes and sweep reports.
//
// main.rs and status.rs delegate all terminal formatting here.

use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::db::models::DedupEntry;
use crate::pipeline::{ScrapeOutcome, SweepReport};
use crate::tracking::account::AccountId;

/// Display tracked accounts with their last seen post and story times.
pub fn display_account_table(accounts: &[(AccountId, Option<DedupEntry>)]) {
    if accounts.is_empty() {
        println!("No accounts tracked yet. Run `instawatch add <username>` first.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Tracked accounts ({}) ===", accounts.len()).bold()
    );
    println!();
    println!(
        "  {:>3}  {:<30}  {:<20}  {:<20}",
        "#".dimmed(),
        "Account".dimmed(),
        "Last post".dimmed(),
        "Last story".dimmed(),
    );
    println!("  {}", "-".repeat(79).dimmed());

    for (i, (account, entry)) in accounts.iter().enumerate() {
        let entry = entry.unwrap_or_default();
        println!(
            "  {:>3}. {:<30}  {:<20}  {:<20}",
            i + 1,
            account.as_str(),
            format_time(entry.last_post_time),
            format_time(entry.last_story_time),
        );
    }
    println!();
}

/// Summarize one scrape.
pub fn display_scrape_outcome(outcome: &ScrapeOutcome) {
    let headline = format!("Scraped {}", outcome.account).bold();
    if outcome.abandoned {
        println!("{headline}: {}", "no longer tracked, results discarded".dimmed());
        return;
    }
    if outcome.seeded {
        println!("{headline}: {}", "state seeded from newest post".dimmed());
        return;
    }

    let story = if outcome.story_notified { ", story" } else { "" };
    println!(
        "{headline}: {} new post(s){story}, {} delivered",
        outcome.posts_notified, outcome.delivered
    );
    if outcome.delivery_failures > 0 {
        println!(
            "  {} {} message(s) could not be delivered",
            "!".bright_red(),
            outcome.delivery_failures
        );
    }
}

/// Summarize one sweep.
pub fn display_sweep_report(report: &SweepReport) {
    println!(
        "{} {} attempted, {} ok, {} failed, {} retries, {} notification(s)",
        "Sweep:".bold(),
        report.attempted,
        report.succeeded.to_string().green(),
        if report.failed > 0 {
            report.failed.to_string().red()
        } else {
            report.failed.to_string().normal()
        },
        report.retries,
        report.notifications,
    );
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
