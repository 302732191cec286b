//! Coordinating client for localstore
//!
//! Drives the worker handshake, waits for readiness, and multiplexes many
//! concurrent queries over the single worker channel.

mod child;
mod coordinator;
mod cross_origin;
mod migrate;
mod rpc;

#[cfg(test)]
mod tests;

pub use child::{ChildProcess, ChildWorker, spawn_child};
pub use coordinator::{Coordinator, CoordinatorConfig, LogEntry, LogLevel, WorkerEvent};
pub use cross_origin::{CrossOriginReport, inspect_resources};
pub use migrate::migrate;
pub use rpc::{AsyncExecutor, PendingCalls, RpcClient};
