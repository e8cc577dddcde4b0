// System status display: backend location, tracked accounts, last seen times.

use anyhow::Result;
use std::path::Path;

use crate::config::{Backend, Config};
use crate::output::terminal;
use crate::tracking::{DedupStore, Registry};

/// Display system status to the terminal.
pub async fn show(config: &Config, registry: &Registry, dedup: &DedupStore) -> Result<()> {
    let files: Vec<&Path> = match config.backend {
        Backend::Json => vec![config.registry_path.as_path(), config.state_path.as_path()],
        Backend::Sqlite => vec![config.db_path.as_path()],
    };

    for path in files {
        if path.exists() {
            let size = std::fs::metadata(path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("State: {} ({})", path.display(), size);
        } else {
            println!("State: {} (not created yet)", path.display());
        }
    }

    match (&config.discord_channel_name, &config.discord_guild_id) {
        (Some(channel), Some(guild)) => println!("Discord: #{channel} in guild {guild}"),
        _ => println!("Discord: not configured (daemon will need --dry-run)"),
    }
    println!(
        "Sweep interval: {} min",
        config.scrape_interval.as_secs() / 60
    );

    let rows: Vec<_> = registry
        .accounts()
        .await
        .into_iter()
        .map(|account| {
            let entry = dedup.get(&account);
            (account, entry)
        })
        .collect();
    terminal::display_account_table(&rows);

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
