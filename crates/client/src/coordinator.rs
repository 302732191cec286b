//! Coordinating side of the worker protocol.
//!
//! A router task owns the worker's response stream. It answers the setup
//! request, records status and log lines, settles pending calls and fans
//! every notable envelope out to subscribers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use localstore_core::{
    Result, StorageStatus, StoreError, WorkerMessage, WorkerResponse, env_parse_optional,
    env_parse_with_default,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cross_origin::{CrossOriginReport, inspect_resources};
use crate::rpc::{PendingCalls, RpcClient};

const EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Sent to the worker in the `setup` message.
    pub db_name: String,
    /// Per-call deadline; `None` waits indefinitely.
    pub query_timeout: Option<Duration>,
    pub log_capacity: usize,
    /// Own URL, the reference origin for resource inspection.
    pub document_url: Option<String>,
    /// Resources loaded alongside the document.
    pub resources: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            db_name: "localstore".to_owned(),
            query_timeout: None,
            log_capacity: 500,
            document_url: None,
            resources: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_name: env_parse_with_default("LOCALSTORE_DB_NAME", defaults.db_name),
            query_timeout: env_parse_optional::<u64>("LOCALSTORE_QUERY_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            log_capacity: env_parse_with_default("LOCALSTORE_LOG_CAPACITY", defaults.log_capacity),
            document_url: env_parse_optional("LOCALSTORE_DOCUMENT_URL"),
            resources: env_parse_optional::<String>("LOCALSTORE_RESOURCE_URLS")
                .map(|list| {
                    list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Log,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// What subscribers see.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Log(LogEntry),
    StorageStatus(StorageStatus),
    CrossOriginReport(CrossOriginReport),
    Ready,
    /// The worker's response stream ended.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Starting,
    Ready,
    Failed(String),
    Closed,
}

/// Most recent log lines, oldest evicted first.
struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    fn push(&self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            tracing::error!("Log buffer lock poisoned");
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.iter().cloned().collect()).unwrap_or_default()
    }
}

pub struct Coordinator {
    client: RpcClient,
    events: broadcast::Sender<WorkerEvent>,
    phase: watch::Receiver<Phase>,
    status: watch::Receiver<Option<StorageStatus>>,
    logs: Arc<LogBuffer>,
    router: JoinHandle<()>,
}

impl Coordinator {
    /// Attach to a worker's channel pair and start routing its responses.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: CoordinatorConfig,
        outbound: UnboundedSender<WorkerMessage>,
        inbound: UnboundedReceiver<WorkerResponse>,
    ) -> Self {
        let pending = PendingCalls::default();
        let (events, _initial_rx) = broadcast::channel(EVENT_CAPACITY);
        let (phase_tx, phase) = watch::channel(Phase::Starting);
        let (status_tx, status) = watch::channel(None);
        let logs = Arc::new(LogBuffer::new(config.log_capacity));

        let router = Router {
            setup: Some(outbound.downgrade()),
            db_name: config.db_name,
            document_url: config.document_url,
            resources: config.resources,
            pending: pending.clone(),
            events: events.clone(),
            phase: phase_tx,
            status: status_tx,
            logs: Arc::clone(&logs),
        };
        let router = tokio::spawn(router.run(inbound));
        let client = RpcClient::new(outbound, pending, config.query_timeout);

        Self { client, events, phase, status, logs, router }
    }

    /// Wait for the worker's `ready` signal and hand out a query handle.
    ///
    /// Fails when startup failed (for instance a migration error) or the
    /// worker went away first.
    pub async fn ready(&self) -> Result<RpcClient> {
        let mut phase = self.phase.clone();
        let current = phase
            .wait_for(|p| *p != Phase::Starting)
            .await
            .map_err(|_| StoreError::ChannelClosed("router stopped".to_owned()))?
            .clone();
        match current {
            Phase::Ready => Ok(self.client.clone()),
            Phase::Failed(message) => Err(StoreError::Migration(message)),
            Phase::Closed | Phase::Starting => {
                Err(StoreError::ChannelClosed("worker stopped before becoming ready".to_owned()))
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.phase.borrow() == Phase::Ready
    }

    /// Dropping the receiver detaches the listener.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    pub fn storage_status(&self) -> Option<StorageStatus> {
        self.status.borrow().clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.snapshot()
    }

    /// Release this handle's sender and wait for the router to finish.
    ///
    /// The worker stops once every `RpcClient` clone has been dropped too.
    pub async fn close(self) -> Result<()> {
        let Self { client, router, .. } = self;
        drop(client);
        router.await.map_err(|e| StoreError::ChannelClosed(format!("router task: {e}")))
    }
}

struct Router {
    /// Taken on the first `request-setup`; weak so the worker can still stop.
    setup: Option<WeakUnboundedSender<WorkerMessage>>,
    db_name: String,
    document_url: Option<String>,
    resources: Vec<String>,
    pending: PendingCalls,
    events: broadcast::Sender<WorkerEvent>,
    phase: watch::Sender<Phase>,
    status: watch::Sender<Option<StorageStatus>>,
    logs: Arc<LogBuffer>,
}

impl Router {
    async fn run(mut self, mut inbound: UnboundedReceiver<WorkerResponse>) {
        while let Some(response) = inbound.recv().await {
            self.handle(response);
        }

        self.pending.abandon_all();
        self.phase.send_if_modified(|phase| match phase {
            Phase::Starting | Phase::Ready => {
                *phase = Phase::Closed;
                true
            },
            Phase::Failed(_) | Phase::Closed => false,
        });
        self.emit(WorkerEvent::Closed);
        tracing::info!("Worker response stream closed");
    }

    fn handle(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::RequestSetup => self.send_setup(),
            WorkerResponse::Response { id, result, error } => {
                self.pending.settle(&id, result, error);
            },
            WorkerResponse::Ready => {
                self.phase.send_replace(Phase::Ready);
                tracing::info!(db = %self.db_name, "Storage worker ready");
                self.emit(WorkerEvent::Ready);
            },
            WorkerResponse::Log { payload } => {
                tracing::info!(target: "localstore::worker", "{}", payload);
                self.record(LogLevel::Log, payload);
            },
            WorkerResponse::Error { payload } => {
                tracing::error!(target: "localstore::worker", "{}", payload);
                let failure = payload.clone();
                self.phase.send_if_modified(|phase| {
                    if *phase == Phase::Starting {
                        *phase = Phase::Failed(failure);
                        true
                    } else {
                        false
                    }
                });
                self.record(LogLevel::Error, payload);
            },
            WorkerResponse::StorageStatus { status } => self.record_status(status),
            WorkerResponse::CheckCrossOriginResources => {
                let report = match &self.document_url {
                    Some(url) => inspect_resources(url, &self.resources),
                    None => {
                        tracing::debug!("No document URL configured, skipping resource inspection");
                        CrossOriginReport::default()
                    },
                };
                self.emit(WorkerEvent::CrossOriginReport(report));
            },
        }
    }

    fn send_setup(&mut self) {
        let Some(weak) = self.setup.take() else {
            tracing::warn!("Worker asked for setup twice, ignoring");
            return;
        };
        let sent = weak
            .upgrade()
            .is_some_and(|tx| tx.send(WorkerMessage::Setup { db_name: self.db_name.clone() }).is_ok());
        if !sent {
            tracing::warn!("Worker channel closed before setup could be sent");
        }
    }

    fn record_status(&mut self, status: StorageStatus) {
        match status.reason() {
            None => tracing::info!("Storage is persistent"),
            Some(reason) => tracing::warn!(reason = %reason, "{}", reason.user_message()),
        }
        if let Some(headers) = &status.diagnostics().isolation_headers {
            if !headers.grants_isolation() {
                tracing::debug!(?headers, "Response headers do not grant cross-origin isolation");
            }
        }
        self.status.send_replace(Some(status.clone()));
        self.emit(WorkerEvent::StorageStatus(status));
    }

    fn record(&self, level: LogLevel, message: String) {
        let entry = LogEntry { level, message };
        self.logs.push(entry.clone());
        self.emit(WorkerEvent::Log(entry));
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
