use anyhow::Result;
use localstore_worker::{WorkerConfig, serve_stdio};

pub(crate) fn run(config: WorkerConfig) -> Result<()> {
    tracing::info!(
        root = ?config.host.storage_root,
        migrations = config.migrations.journal.entries.len(),
        "Serving storage worker on stdio"
    );
    serve_stdio(config)?;
    Ok(())
}
