// JsonFileDatabase: the default backend, two plain JSON files.
//
// The registry lives in a `config.json`-style record and the dedup state in
// a map of account -> {last_post_time, last_story_time}. Every save rewrites
// the whole file: serialize, write to a sibling temp file, then rename over
// the target so a crash mid-write never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::models::{parse_timestamp, DedupEntry, DedupSnapshot, RegistryRecord};
use super::traits::Database;
use crate::tracking::account::AccountId;

pub struct JsonFileDatabase {
    registry_path: PathBuf,
    state_path: PathBuf,
}

impl JsonFileDatabase {
    pub fn new(registry_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            state_path: state_path.into(),
        }
    }
}

/// A dedup entry as found on disk: either the current object form or the
/// older bare-timestamp form that only tracked posts.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full(DedupEntry),
    PostTimeOnly(String),
}

/// Read a file, treating "not found" as `None`.
async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Write `contents` to `path` via a temp file + rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote state file");
    Ok(())
}

#[async_trait]
impl Database for JsonFileDatabase {
    fn location(&self) -> String {
        format!(
            "{} + {}",
            self.registry_path.display(),
            self.state_path.display()
        )
    }

    async fn load_registry(&self) -> Result<RegistryRecord> {
        match read_optional(&self.registry_path).await? {
            Some(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", self.registry_path.display())),
            None => Ok(RegistryRecord::default()),
        }
    }

    async fn save_registry(&self, record: &RegistryRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.registry_path, &json).await
    }

    async fn load_dedup_state(&self) -> Result<DedupSnapshot> {
        let Some(contents) = read_optional(&self.state_path).await? else {
            return Ok(DedupSnapshot::new());
        };

        let raw: BTreeMap<String, StoredEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.state_path.display()))?;

        let mut state = DedupSnapshot::new();
        for (name, stored) in raw {
            let Ok(account) = AccountId::parse(&name) else {
                warn!(account = %name, "Skipping dedup entry with invalid username");
                continue;
            };
            let entry = match stored {
                StoredEntry::Full(entry) => entry,
                StoredEntry::PostTimeOnly(ts) => match parse_timestamp(&ts) {
                    Some(time) => DedupEntry {
                        last_post_time: Some(time),
                        last_story_time: None,
                    },
                    None => {
                        warn!(account = %name, value = %ts, "Skipping unparseable timestamp");
                        continue;
                    }
                },
            };
            state.insert(account, entry);
        }
        Ok(state)
    }

    async fn save_dedup_state(&self, state: &DedupSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.state_path, &json).await
    }
}
