//! Forward-only migrations replayed from a drizzle-kit journal.
//!
//! The runner only needs the `(sql, params, method) -> rows` callback, so it
//! works over any [`Executor`]. The transaction is explicit `BEGIN` /
//! `COMMIT` / `ROLLBACK` statements issued through that same callback.

use localstore_core::{
    MIGRATIONS_TABLE, MIGRATIONS_TABLE_EXISTS_SQL, MigrationConfig, MigrationMeta, MigrationReport,
    QueryMethod, Result, SqlValue, create_migrations_table_sql, cursor_from_row, history_entry,
    latest_migration_sql, migration_history_sql, record_migration_sql,
};

use crate::adapter::Executor;

/// Apply every pending migration inside one transaction.
///
/// The journal is resolved first, so a missing script fails before any
/// statement runs. Any failure afterwards, including a failed `COMMIT`, rolls
/// the whole batch back and returns the original error.
pub fn run_migrations<E: Executor + ?Sized>(exec: &E, config: &MigrationConfig) -> Result<MigrationReport> {
    let migrations = config.read_migrations()?;

    exec.execute("BEGIN", &[], QueryMethod::Run)?;
    let outcome = apply(exec, &migrations)
        .and_then(|report| exec.execute("COMMIT", &[], QueryMethod::Run).map(|_| report));
    match outcome {
        Ok(report) => {
            tracing::info!(
                applied = report.applied.len(),
                skipped = report.skipped,
                "Database migrations complete"
            );
            Ok(report)
        },
        Err(e) => {
            tracing::error!(
                error = %e,
                migrations = ?migrations.iter().map(|m| m.tag.as_str()).collect::<Vec<_>>(),
                "Database migration failed, rolling back"
            );
            if let Err(rollback) = exec.execute("ROLLBACK", &[], QueryMethod::Run) {
                tracing::warn!("Rollback after failed migration also failed: {}", rollback);
            }
            Err(e)
        },
    }
}

fn apply<E: Executor + ?Sized>(exec: &E, migrations: &[MigrationMeta]) -> Result<MigrationReport> {
    exec.execute(&create_migrations_table_sql(), &[], QueryMethod::Run)?;
    let latest = exec.execute(&latest_migration_sql(), &[], QueryMethod::Values)?.into_row();
    let cursor = cursor_from_row(latest.as_deref());
    tracing::info!(last_applied = ?cursor, candidates = migrations.len(), "Checking migrations");

    let mut report = MigrationReport::default();
    for migration in migrations {
        if migration.is_applied(cursor) {
            report.skipped += 1;
            continue;
        }

        tracing::info!(tag = %migration.tag, statements = migration.statements.len(), "Running migration");
        for statement in &migration.statements {
            exec.execute(statement, &[], QueryMethod::Run)?;
        }
        exec.execute(&record_migration_sql(), &migration.record_params(), QueryMethod::Run)?;
        report.applied.push(migration.applied());
    }
    Ok(report)
}

/// Bookkeeping rows as `(hash, created_at)`, oldest first. Empty when the
/// table does not exist yet.
pub fn applied_migrations<E: Executor + ?Sized>(exec: &E) -> Result<Vec<(String, i64)>> {
    let exists = exec
        .execute(MIGRATIONS_TABLE_EXISTS_SQL, &[SqlValue::from(MIGRATIONS_TABLE)], QueryMethod::Get)?
        .into_row()
        .is_some();
    if !exists {
        return Ok(Vec::new());
    }

    let rows = exec.execute(&migration_history_sql(), &[], QueryMethod::All)?.into_rows();
    Ok(rows.iter().filter_map(|row| history_entry(row)).collect())
}
