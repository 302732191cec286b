//! Migration journal and scripts, in the layout produced by drizzle-kit.
//!
//! A migrations folder holds `meta/_journal.json` plus one `<tag>.sql` per
//! journal entry. In memory the scripts are keyed `m` + zero-padded index.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

pub const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub journal: Journal,
    pub migrations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub entries: Vec<JournalEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub idx: u32,
    /// Folder timestamp in milliseconds; the ordering key for applied state.
    pub when: i64,
    pub tag: String,
    #[serde(default = "default_breakpoints")]
    pub breakpoints: bool,
}

fn default_breakpoints() -> bool {
    true
}

/// One journal entry resolved against its script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationMeta {
    pub idx: u32,
    pub tag: String,
    pub statements: Vec<String>,
    pub folder_millis: i64,
    pub hash: String,
}

pub fn migration_key(idx: u32) -> String {
    format!("m{idx:04}")
}

/// Lowercase hex SHA-256 of the raw script text.
pub fn content_hash(script: &str) -> String {
    hex::encode(Sha256::digest(script.as_bytes()))
}

/// Split a script on the statement breakpoint marker, dropping blank chunks.
pub fn split_statements(script: &str) -> Vec<String> {
    script
        .split(STATEMENT_BREAKPOINT)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

impl MigrationConfig {
    pub fn new(entries: Vec<JournalEntry>, migrations: BTreeMap<String, String>) -> Self {
        Self { journal: Journal { entries }, migrations }
    }

    pub fn is_empty(&self) -> bool {
        self.journal.entries.is_empty()
    }

    /// Load a drizzle-kit migrations folder.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let journal_path = dir.join("meta").join("_journal.json");
        let raw = fs::read_to_string(&journal_path).map_err(|e| {
            StoreError::Config(format!("cannot read journal {}: {e}", journal_path.display()))
        })?;
        let journal: Journal = serde_json::from_str(&raw)?;

        let mut migrations = BTreeMap::new();
        for entry in &journal.entries {
            let script_path = dir.join(format!("{}.sql", entry.tag));
            let script = fs::read_to_string(&script_path).map_err(|e| {
                StoreError::Config(format!(
                    "cannot read migration {} at {}: {e}",
                    entry.tag,
                    script_path.display()
                ))
            })?;
            migrations.insert(migration_key(entry.idx), script);
        }

        tracing::debug!(dir = %dir.display(), entries = journal.entries.len(), "loaded migration journal");
        Ok(Self { journal, migrations })
    }

    /// Resolve every journal entry, in ascending index order.
    ///
    /// Fails on the first entry whose script is missing, so nothing runs
    /// against a half-configured journal.
    pub fn read_migrations(&self) -> Result<Vec<MigrationMeta>> {
        let mut entries: Vec<&JournalEntry> = self.journal.entries.iter().collect();
        entries.sort_by_key(|e| e.idx);

        entries
            .into_iter()
            .map(|entry| {
                let script = self
                    .migrations
                    .get(&migration_key(entry.idx))
                    .ok_or_else(|| StoreError::Config(format!("Missing migration: {}", entry.tag)))?;
                let statements = if entry.breakpoints {
                    split_statements(script)
                } else {
                    vec![script.trim().to_owned()]
                };
                Ok(MigrationMeta {
                    idx: entry.idx,
                    tag: entry.tag.clone(),
                    statements,
                    folder_millis: entry.when,
                    hash: content_hash(script),
                })
            })
            .collect()
    }
}
