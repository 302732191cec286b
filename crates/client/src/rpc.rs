//! Correlated request/response calls over the worker channel.
//!
//! Every call registers a one-shot slot under a fresh id before the query is
//! sent. The router settles slots as responses arrive, in whatever order the
//! worker produces them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use localstore_core::{
    QueryMethod, QueryOutput, QueryResult, Result, SqlValue, StoreError, WorkerMessage,
    new_correlation_id,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

type Settlement = std::result::Result<QueryResult, String>;

/// Table of calls still waiting for their response.
#[derive(Clone, Default)]
pub struct PendingCalls {
    slots: Arc<Mutex<HashMap<String, oneshot::Sender<Settlement>>>>,
}

fn lock_slots<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e: PoisonError<_>| StoreError::Protocol(format!("pending table lock poisoned: {e}")))
}

impl PendingCalls {
    fn register(&self, id: &str) -> Result<oneshot::Receiver<Settlement>> {
        let (tx, rx) = oneshot::channel();
        lock_slots(&self.slots)?.insert(id.to_owned(), tx);
        Ok(rx)
    }

    fn forget(&self, id: &str) {
        if let Ok(mut slots) = lock_slots(&self.slots) {
            slots.remove(id);
        }
    }

    /// Hand a response to its caller.
    ///
    /// Returns `false` for an id that is unknown or already settled; such
    /// responses are dropped without further effect.
    pub fn settle(&self, id: &str, result: QueryResult, error: Option<String>) -> bool {
        let slot = match lock_slots(&self.slots) {
            Ok(mut slots) => slots.remove(id),
            Err(e) => {
                tracing::error!("{}", e);
                return false;
            },
        };
        match slot {
            Some(tx) => {
                let settlement = match error {
                    Some(message) => Err(message),
                    None => Ok(result),
                };
                // The caller may have stopped waiting; nothing to do then.
                let _ = tx.send(settlement);
                true
            },
            None => {
                tracing::debug!(id, "Dropping response for unknown call");
                false
            },
        }
    }

    /// Drop every slot; waiting callers observe a closed channel.
    pub fn abandon_all(&self) {
        if let Ok(mut slots) = lock_slots(&self.slots) {
            slots.clear();
        }
    }

    pub fn len(&self) -> usize {
        lock_slots(&self.slots).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for issuing queries to a ready worker. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    outbound: UnboundedSender<WorkerMessage>,
    pending: PendingCalls,
    timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(outbound: UnboundedSender<WorkerMessage>, pending: PendingCalls, timeout: Option<Duration>) -> Self {
        Self { outbound, pending, timeout }
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Send one statement and wait for its correlated response.
    ///
    /// Without a configured timeout a call waits until the worker answers or
    /// goes away.
    pub async fn call(&self, sql: &str, params: Vec<SqlValue>, method: QueryMethod) -> Result<QueryOutput> {
        let id = new_correlation_id();
        let rx = self.pending.register(&id)?;

        let message = WorkerMessage::Query {
            id: id.clone(),
            sql: sql.to_owned(),
            params: params.iter().map(SqlValue::to_json).collect(),
            method,
        };
        if self.outbound.send(message).is_err() {
            self.pending.forget(&id);
            return Err(StoreError::ChannelClosed("worker is gone".to_owned()));
        }

        let settled = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    self.pending.forget(&id);
                    tracing::warn!(id = %id, %method, "Query timed out");
                    return Err(StoreError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)));
                },
            },
            None => rx.await,
        };

        let result = settled
            .map_err(|_| StoreError::ChannelClosed("worker stopped before answering".to_owned()))?
            .map_err(StoreError::from_wire)?;
        QueryOutput::from_wire(method, &result)
    }

    pub async fn run(&self, sql: &str, params: Vec<SqlValue>) -> Result<()> {
        self.call(sql, params, QueryMethod::Run).await.map(|_| ())
    }

    pub async fn get(&self, sql: &str, params: Vec<SqlValue>) -> Result<Option<Vec<SqlValue>>> {
        self.call(sql, params, QueryMethod::Get).await.map(QueryOutput::into_row)
    }

    pub async fn all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Vec<SqlValue>>> {
        self.call(sql, params, QueryMethod::All).await.map(QueryOutput::into_rows)
    }

    pub async fn values(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Vec<SqlValue>>> {
        self.call(sql, params, QueryMethod::Values).await.map(QueryOutput::into_rows)
    }
}

/// Asynchronous `(sql, params, method) -> rows` callback for query builders.
#[async_trait]
pub trait AsyncExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: Vec<SqlValue>, method: QueryMethod) -> Result<QueryOutput>;
}

#[async_trait]
impl AsyncExecutor for RpcClient {
    async fn execute(&self, sql: &str, params: Vec<SqlValue>, method: QueryMethod) -> Result<QueryOutput> {
        self.call(sql, params, method).await
    }
}
