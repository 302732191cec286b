//! Apply a drizzle-kit migrations folder directly to the database file.

use std::path::Path;

use anyhow::Result;
use localstore_core::MigrationConfig;
use localstore_storage::{Adapter, applied_migrations};
use serde_json::json;

use crate::Settings;

pub(crate) fn run(settings: &Settings, dir: &Path) -> Result<()> {
    let config = MigrationConfig::from_dir(dir)?;
    let db_path = settings.database_path()?;
    let adapter = Adapter::open(&db_path)?;

    println!("Migrating {} ...", db_path.display());
    let report = adapter.migrate(&config)?;
    for applied in &report.applied {
        println!("  applied {} ({})", applied.tag, applied.hash);
    }
    println!("  {} applied, {} already up to date", report.applied.len(), report.skipped);

    let history: Vec<_> = applied_migrations(&adapter)?
        .into_iter()
        .map(|(hash, created_at)| json!({ "hash": hash, "createdAt": created_at }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&history)?);

    adapter.close()?;
    Ok(())
}
