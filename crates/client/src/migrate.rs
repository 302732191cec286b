//! Migrations driven from the coordinating side.
//!
//! Same bookkeeping as the worker's own runner, issued statement by statement
//! through an [`AsyncExecutor`]. The worker handles one message at a time, so
//! the explicit transaction holds as long as no other caller queries the same
//! worker while it is open.

use localstore_core::{
    MigrationConfig, MigrationMeta, MigrationReport, QueryMethod, Result, create_migrations_table_sql,
    cursor_from_row, latest_migration_sql, record_migration_sql,
};

use crate::rpc::AsyncExecutor;

/// Apply every pending migration inside one transaction, over `exec`.
pub async fn migrate<E: AsyncExecutor + ?Sized>(exec: &E, config: &MigrationConfig) -> Result<MigrationReport> {
    let migrations = config.read_migrations()?;

    exec.execute("BEGIN", vec![], QueryMethod::Run).await?;
    let outcome = match apply(exec, &migrations).await {
        Ok(report) => exec.execute("COMMIT", vec![], QueryMethod::Run).await.map(|_| report),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(report) => {
            tracing::info!(applied = report.applied.len(), skipped = report.skipped, "Remote migrations complete");
            Ok(report)
        },
        Err(e) => {
            tracing::error!(error = %e, "Remote migration failed, rolling back");
            if let Err(rollback) = exec.execute("ROLLBACK", vec![], QueryMethod::Run).await {
                tracing::warn!("Rollback after failed migration also failed: {}", rollback);
            }
            Err(e)
        },
    }
}

async fn apply<E: AsyncExecutor + ?Sized>(exec: &E, migrations: &[MigrationMeta]) -> Result<MigrationReport> {
    exec.execute(&create_migrations_table_sql(), vec![], QueryMethod::Run).await?;
    let latest = exec.execute(&latest_migration_sql(), vec![], QueryMethod::Values).await?.into_row();
    let cursor = cursor_from_row(latest.as_deref());

    let mut report = MigrationReport::default();
    for migration in migrations {
        if migration.is_applied(cursor) {
            report.skipped += 1;
            continue;
        }
        tracing::debug!(tag = %migration.tag, "Running migration");
        for statement in &migration.statements {
            exec.execute(statement, vec![], QueryMethod::Run).await?;
        }
        exec.execute(&record_migration_sql(), migration.record_params(), QueryMethod::Run).await?;
        report.applied.push(migration.applied());
    }
    Ok(report)
}
