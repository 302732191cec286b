//! Storage worker for localstore
//!
//! Owns the database connection on a dedicated thread and speaks the
//! envelope protocol over a pair of channels.

mod config;
mod lifecycle;
mod probe;
mod transport;


use std::io;
use std::thread::JoinHandle;

use localstore_core::{MigrationConfig, WorkerMessage, WorkerResponse};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub use config::{WorkerConfig, default_data_dir};
pub use lifecycle::{LifecycleState, StorageWorker, WorkerContext, database_path};
pub use probe::{Host, HostConfig, NativeHost, probe};
pub use transport::{serve_lines, serve_stdio};

/// Channel ends of a running worker thread.
///
/// Dropping `sender` stops the worker once it has drained its queue.
pub struct WorkerHandle {
    pub sender: UnboundedSender<WorkerMessage>,
    pub receiver: UnboundedReceiver<WorkerResponse>,
    pub thread: JoinHandle<()>,
}

pub fn spawn_worker<H: Host + 'static>(host: H, migrations: MigrationConfig) -> io::Result<WorkerHandle> {
    let (sender, inbound) = mpsc::unbounded_channel();
    let (outbound, receiver) = mpsc::unbounded_channel();
    let thread = std::thread::Builder::new()
        .name("localstore-worker".to_owned())
        .spawn(move || StorageWorker::new(host, migrations, outbound).run(inbound))?;
    Ok(WorkerHandle { sender, receiver, thread })
}

/// Spawn a worker on the native host described by `config`.
pub fn spawn_native(config: WorkerConfig) -> io::Result<WorkerHandle> {
    spawn_worker(NativeHost::new(config.host), config.migrations)
}
