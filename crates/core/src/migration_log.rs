//! Bookkeeping table for applied migrations.
//!
//! Applied migrations are recorded as `(hash, created_at)` rows. The newest
//! `created_at` is the cursor: a journal entry runs only when its folder
//! timestamp is strictly newer. Both the blocking runner and the async runner
//! build their statements from here, so they agree on the table layout.

use crate::migration_config::MigrationMeta;
use crate::value::SqlValue;

pub const MIGRATIONS_TABLE: &str = "__drizzle_migrations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub idx: u32,
    pub tag: String,
    pub hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<AppliedMigration>,
    pub skipped: usize,
}

pub fn create_migrations_table_sql() -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS "{MIGRATIONS_TABLE}" (
            id SERIAL PRIMARY KEY,
            hash text NOT NULL,
            created_at numeric
        )"#
    )
}

/// Newest bookkeeping row as `(id, hash, created_at)`.
pub fn latest_migration_sql() -> String {
    format!(r#"SELECT id, hash, created_at FROM "{MIGRATIONS_TABLE}" ORDER BY created_at DESC LIMIT 1"#)
}

pub fn record_migration_sql() -> String {
    format!(r#"INSERT INTO "{MIGRATIONS_TABLE}" ("hash", "created_at") VALUES (?, ?)"#)
}

/// One parameter: the table name.
pub const MIGRATIONS_TABLE_EXISTS_SQL: &str =
    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?";

pub fn migration_history_sql() -> String {
    format!(r#"SELECT hash, created_at FROM "{MIGRATIONS_TABLE}" ORDER BY created_at ASC"#)
}

/// Cursor taken from the row returned by [`latest_migration_sql`].
pub fn cursor_from_row(row: Option<&[SqlValue]>) -> Option<i64> {
    row.and_then(|r| r.get(2)).and_then(millis_of)
}

/// `(hash, created_at)` from a row of [`migration_history_sql`].
pub fn history_entry(row: &[SqlValue]) -> Option<(String, i64)> {
    let hash = row.first()?.as_str()?.to_owned();
    let created_at = row.get(1).and_then(millis_of)?;
    Some((hash, created_at))
}

/// `created_at` is declared `numeric`, so external writers may leave text.
fn millis_of(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Integer(v) => Some(*v),
        SqlValue::Real(v) => Some(*v as i64),
        SqlValue::Text(v) => v.trim().parse().ok(),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

impl MigrationMeta {
    /// Whether the bookkeeping cursor already covers this entry.
    pub fn is_applied(&self, cursor: Option<i64>) -> bool {
        cursor.is_some_and(|last| self.folder_millis <= last)
    }

    /// Parameters for [`record_migration_sql`].
    pub fn record_params(&self) -> Vec<SqlValue> {
        vec![SqlValue::from(self.hash.as_str()), SqlValue::Integer(self.folder_millis)]
    }

    pub fn applied(&self) -> AppliedMigration {
        AppliedMigration {
            idx: self.idx,
            tag: self.tag.clone(),
            hash: self.hash.clone(),
            created_at: self.folder_millis,
        }
    }
}
