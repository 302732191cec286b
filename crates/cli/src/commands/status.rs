use anyhow::Result;
use serde_json::json;

use crate::{Settings, boot, shutdown};

/// Boot a worker, wait for startup to settle, print the status.
pub(crate) async fn run(settings: &Settings) -> Result<()> {
    let (coordinator, worker) = boot(settings)?;
    let ready = coordinator.ready().await.map(drop);

    let status = coordinator.storage_status();
    let report = json!({
        "ready": ready.is_ok(),
        "storage": status,
        "notification": status.as_ref().and_then(|s| s.notification()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    shutdown(coordinator, worker).await?;
    ready.map_err(Into::into)
}
