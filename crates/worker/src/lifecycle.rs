//! Worker lifecycle: handshake, probe, open, classify, migrate, serve.
//!
//! The worker runs on its own thread and is the only owner of the database
//! connection. Inbound messages are handled one at a time, so statements
//! against the connection are serialized without any locking.

use std::path::PathBuf;

use chrono::Utc;
use localstore_core::{
    Diagnostics, MigrationConfig, QueryMethod, Result, StorageStatus, StoreError, WorkerMessage,
    WorkerResponse,
};
use localstore_storage::{Adapter, engine_version};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::probe::{Host, probe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Booting,
    Probing,
    OpeningStorage,
    Migrating,
    Ready,
    Serving,
    /// Startup failed; the worker keeps answering queries with "not ready".
    Failed,
}

/// State created at `OpeningStorage` and owned until shutdown.
pub struct WorkerContext {
    pub adapter: Adapter,
    pub status: StorageStatus,
}

pub struct StorageWorker<H: Host> {
    host: H,
    migrations: MigrationConfig,
    outbound: UnboundedSender<WorkerResponse>,
    state: LifecycleState,
    context: Option<WorkerContext>,
}

impl<H: Host> StorageWorker<H> {
    pub fn new(host: H, migrations: MigrationConfig, outbound: UnboundedSender<WorkerResponse>) -> Self {
        Self { host, migrations, outbound, state: LifecycleState::Booting, context: None }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Drive the worker until the inbound channel closes.
    pub fn run(mut self, mut inbound: UnboundedReceiver<WorkerMessage>) {
        self.log(&format!("Loading and initializing SQLite {}", engine_version()));
        self.send(WorkerResponse::RequestSetup);

        while let Some(message) = inbound.blocking_recv() {
            match message {
                WorkerMessage::Setup { db_name } => {
                    if self.state == LifecycleState::Booting {
                        self.boot(&db_name);
                    } else {
                        tracing::warn!(db = %db_name, state = ?self.state, "Ignoring repeated setup");
                    }
                },
                WorkerMessage::Query { id, sql, params, method } => {
                    let response = self.handle_query(id, &sql, &params, method);
                    self.send(response);
                },
            }
        }

        self.shutdown();
    }

    fn boot(&mut self, db_name: &str) {
        self.state = LifecycleState::Probing;
        let diagnostics = probe(&self.host);

        self.state = LifecycleState::OpeningStorage;
        let (adapter, durable) = match self.open_storage(db_name, &diagnostics) {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(&format!("Could not open any storage: {e}"));
                return;
            },
        };

        let status = StorageStatus::classify(durable, diagnostics);
        match status.reason() {
            None => self.log(&format!(
                "Done initializing. Persisted storage is available at {}",
                adapter.filename().unwrap_or_default()
            )),
            Some(reason) => self.log(&format!("Using transient storage ({reason}): {}", reason.user_message())),
        }
        let isolated = status.diagnostics().cross_origin_isolated;
        self.send(WorkerResponse::StorageStatus { status: status.clone() });
        if !isolated {
            self.send(WorkerResponse::CheckCrossOriginResources);
        }
        self.context = Some(WorkerContext { adapter, status });

        self.state = LifecycleState::Migrating;
        let outcome = match &self.context {
            Some(ctx) => ctx.adapter.migrate(&self.migrations),
            None => Err(StoreError::NotReady),
        };
        match outcome {
            Ok(report) => {
                for applied in &report.applied {
                    self.log(&format!("Applied migration {} ({})", applied.tag, applied.hash));
                }
                self.state = LifecycleState::Ready;
                self.send(WorkerResponse::Ready);
                self.state = LifecycleState::Serving;
            },
            Err(e) => {
                let wrapped = StoreError::Migration(e.wire_message());
                self.fail(&wrapped.to_string());
            },
        }
    }

    /// Durable file when the host allows it, otherwise a volatile database.
    ///
    /// The durable backend needs a secure, cross-origin isolated context and
    /// a writable storage root.
    fn open_storage(&self, db_name: &str, diagnostics: &Diagnostics) -> Result<(Adapter, bool)> {
        let eligible = diagnostics.secure_context
            && diagnostics.cross_origin_isolated
            && diagnostics.durable_api_accessible;
        if let Some(path) = self.host.storage_root().filter(|_| eligible).map(|r| database_path(r, db_name)) {
            match Adapter::open(&path) {
                Ok(adapter) => return Ok((adapter, true)),
                Err(e) => tracing::warn!(path = %path.display(), "Durable storage unavailable: {}", e),
            }
        }
        Adapter::open_in_memory().map(|adapter| (adapter, false))
    }

    fn handle_query(&self, id: String, sql: &str, params: &[JsonValue], method: QueryMethod) -> WorkerResponse {
        let ctx = match (&self.context, self.state) {
            (Some(ctx), LifecycleState::Serving) => ctx,
            _ => return WorkerResponse::failure(id, &StoreError::NotReady),
        };
        match ctx.adapter.execute_wire(sql, params, method) {
            Ok(output) => WorkerResponse::success(id, output),
            Err(e) => {
                tracing::debug!(id = %id, %method, "Query failed: {}", e);
                WorkerResponse::failure(id, &e)
            },
        }
    }

    fn shutdown(&mut self) {
        if let Some(ctx) = self.context.take() {
            if let Err(e) = ctx.adapter.close() {
                tracing::warn!("Closing database failed: {}", e);
            }
        }
        tracing::info!("Storage worker stopped");
    }

    fn fail(&mut self, message: &str) {
        self.state = LifecycleState::Failed;
        self.error(message);
    }

    fn log(&self, message: &str) {
        tracing::info!("{}", message);
        self.send(WorkerResponse::Log { payload: stamp(message) });
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
        self.send(WorkerResponse::Error { payload: stamp(message) });
    }

    fn send(&self, response: WorkerResponse) {
        if self.outbound.send(response).is_err() {
            tracing::debug!("Coordinator gone, dropping envelope");
        }
    }
}

fn stamp(message: &str) -> String {
    format!("[{}] {}", Utc::now().to_rfc3339(), message)
}

/// `<root>/<name>.sqlite3`, with anything outside `[A-Za-z0-9_-]` replaced.
pub fn database_path(root: PathBuf, db_name: &str) -> PathBuf {
    let name: String = db_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let name = if name.is_empty() { "localstore".to_owned() } else { name };
    root.join(format!("{name}.sqlite3"))
}
