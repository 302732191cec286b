//! Storage layer for localstore
//!
//! Wraps a single SQLite connection in a statement-oriented interface and
//! replays drizzle-kit migration journals against it.

mod adapter;
mod migrations;

pub use adapter::{Adapter, Executor, execute, execute_wire};
pub use localstore_core::{AppliedMigration, MIGRATIONS_TABLE, MigrationReport};
pub use migrations::{applied_migrations, run_migrations};

/// Version string of the embedded SQLite engine.
pub fn engine_version() -> &'static str {
    rusqlite::version()
}
