use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use localstore_core::{
    Diagnostics, QueryMethod, QueryOutput, QueryResult, SqlValue, StorageStatus, StoreError, TransientReason,
    WorkerMessage, WorkerResponse,
};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{AsyncExecutor, Coordinator, CoordinatorConfig, LogLevel, PendingCalls, WorkerEvent};

/// The worker end of a coordinator under test.
struct FakeWorker {
    inbox: UnboundedReceiver<WorkerMessage>,
    outbox: UnboundedSender<WorkerResponse>,
}

impl FakeWorker {
    fn send(&self, response: WorkerResponse) {
        self.outbox.send(response).unwrap();
    }

    async fn next_query(&mut self) -> (String, String, Vec<serde_json::Value>) {
        loop {
            match self.inbox.recv().await {
                Some(WorkerMessage::Query { id, sql, params, .. }) => return (id, sql, params),
                Some(WorkerMessage::Setup { .. }) => continue,
                None => panic!("coordinator dropped its sender"),
            }
        }
    }

    fn respond(&self, id: &str, rows: serde_json::Value) {
        self.send(WorkerResponse::Response { id: id.to_owned(), result: QueryResult { rows }, error: None });
    }
}

fn start(config: CoordinatorConfig) -> (Coordinator, FakeWorker) {
    let (to_worker, inbox) = mpsc::unbounded_channel();
    let (outbox, from_worker) = mpsc::unbounded_channel();
    let coordinator = Coordinator::start(config, to_worker, from_worker);
    (coordinator, FakeWorker { inbox, outbox })
}

fn transient(reason: TransientReason) -> StorageStatus {
    StorageStatus::Transient { reason, diagnostics: Diagnostics::default() }
}

#[tokio::test]
async fn test_setup_handshake() {
    let (coordinator, mut worker) =
        start(CoordinatorConfig { db_name: "test".to_owned(), ..CoordinatorConfig::default() });
    worker.send(WorkerResponse::RequestSetup);
    assert_eq!(worker.inbox.recv().await, Some(WorkerMessage::Setup { db_name: "test".to_owned() }));

    // One-shot: a second request gets nothing.
    worker.send(WorkerResponse::RequestSetup);
    worker.send(WorkerResponse::Ready);
    coordinator.ready().await.unwrap();
    assert!(worker.inbox.try_recv().is_err());
    assert!(coordinator.is_ready());
}

#[tokio::test]
async fn test_concurrent_calls_answered_in_reverse() {
    const N: i64 = 8;
    let (coordinator, mut worker) = start(CoordinatorConfig::default());
    worker.send(WorkerResponse::Ready);
    let client = coordinator.ready().await.unwrap();

    let responder = tokio::spawn(async move {
        let mut queries = Vec::new();
        while queries.len() < N as usize {
            queries.push(worker.next_query().await);
        }
        let ids: std::collections::HashSet<_> = queries.iter().map(|(id, _, _)| id.clone()).collect();
        assert_eq!(ids.len(), N as usize);
        for (id, _, params) in queries.into_iter().rev() {
            worker.respond(&id, json!([params[0]]));
        }
        worker
    });

    let calls = (0..N).map(|i| {
        let client = client.clone();
        async move { client.get("SELECT ?", vec![SqlValue::Integer(i)]).await }
    });
    let results = join_all(calls).await;
    for (i, result) in (0..N).zip(results) {
        assert_eq!(result.unwrap(), Some(vec![SqlValue::Integer(i)]));
    }
    responder.await.unwrap();
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_duplicate_and_unknown_responses_are_ignored() {
    let (coordinator, mut worker) = start(CoordinatorConfig::default());
    worker.send(WorkerResponse::Ready);
    let client = coordinator.ready().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.all("SELECT 1", vec![]).await }
    });
    let (id, _, _) = worker.next_query().await;
    worker.respond(&id, json!([[1]]));
    worker.respond(&id, json!([[2]]));
    worker.respond("never-issued", json!([[3]]));

    assert_eq!(call.await.unwrap().unwrap(), vec![vec![SqlValue::Integer(1)]]);

    // Still usable afterwards.
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.values("SELECT 4", vec![]).await }
    });
    let (id, _, _) = worker.next_query().await;
    worker.respond(&id, json!([[4]]));
    assert_eq!(call.await.unwrap().unwrap(), vec![vec![SqlValue::Integer(4)]]);
    assert!(client.pending().is_empty());
}

#[test]
fn test_settle_unknown_id() {
    let pending = PendingCalls::default();
    assert!(!pending.settle("nope", QueryResult::empty(), None));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_timeout_removes_pending_call() {
    let config = CoordinatorConfig { query_timeout: Some(Duration::from_millis(50)), ..CoordinatorConfig::default() };
    let (coordinator, mut worker) = start(config);
    worker.send(WorkerResponse::Ready);
    let client = coordinator.ready().await.unwrap();

    let err = client.run("UPDATE t SET x = 1", vec![]).await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout(50)));
    assert!(client.pending().is_empty());

    let (id, _, _) = worker.next_query().await;
    assert!(!client.pending().settle(&id, QueryResult::empty(), None));
}

#[tokio::test]
async fn test_error_responses() {
    let (coordinator, mut worker) = start(CoordinatorConfig::default());
    worker.send(WorkerResponse::Ready);
    let client = coordinator.ready().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.run("INSERT INTO missing VALUES (1)", vec![]).await }
    });
    let (id, _, _) = worker.next_query().await;
    worker.send(WorkerResponse::Response {
        id,
        result: QueryResult::empty(),
        error: Some("no such table: missing".to_owned()),
    });
    match call.await.unwrap() {
        Err(StoreError::Engine(message)) => assert_eq!(message, "no such table: missing"),
        other => panic!("unexpected {other:?}"),
    }

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.get("SELECT 1", vec![]).await }
    });
    let (id, _, _) = worker.next_query().await;
    worker.send(WorkerResponse::Response {
        id,
        result: QueryResult::empty(),
        error: Some("database not ready".to_owned()),
    });
    assert!(matches!(call.await.unwrap(), Err(StoreError::NotReady)));

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.get("SELECT ?, ?", vec![SqlValue::Integer(1)]).await }
    });
    let (id, _, _) = worker.next_query().await;
    worker.send(WorkerResponse::Response {
        id,
        result: QueryResult::empty(),
        error: Some("Binding error: Expected 2 parameters, got 1".to_owned()),
    });
    match call.await.unwrap() {
        Err(StoreError::Binding(message)) => assert_eq!(message, "Expected 2 parameters, got 1"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_startup_failure_is_reported() {
    let (coordinator, worker) = start(CoordinatorConfig::default());
    worker.send(WorkerResponse::Error { payload: "Migration error: near \"NOT\": syntax error".to_owned() });
    match coordinator.ready().await {
        Err(StoreError::Migration(message)) => assert!(message.contains("syntax error")),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("should not be ready"),
    }
    assert!(!coordinator.is_ready());
}

#[tokio::test]
async fn test_worker_gone_before_ready() {
    let (coordinator, worker) = start(CoordinatorConfig::default());
    drop(worker);
    assert!(matches!(coordinator.ready().await, Err(StoreError::ChannelClosed(_))));
}

#[tokio::test]
async fn test_log_buffer_is_bounded() {
    let (coordinator, worker) = start(CoordinatorConfig { log_capacity: 2, ..CoordinatorConfig::default() });
    for line in ["one", "two", "three"] {
        worker.send(WorkerResponse::Log { payload: line.to_owned() });
    }
    worker.send(WorkerResponse::Ready);
    coordinator.ready().await.unwrap();

    let logs = coordinator.logs();
    assert_eq!(logs.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(), ["two", "three"]);
    assert!(logs.iter().all(|l| l.level == LogLevel::Log));
}

#[tokio::test]
async fn test_subscribers_see_status_and_resource_report() {
    let config = CoordinatorConfig {
        document_url: Some("https://app.example/".to_owned()),
        resources: vec!["/app.js".to_owned(), "https://cdn.example/lib.js".to_owned()],
        ..CoordinatorConfig::default()
    };
    let (coordinator, worker) = start(config);
    let mut events = coordinator.subscribe();
    let detached = coordinator.subscribe();
    drop(detached);

    let status = transient(TransientReason::NotCrossOriginIsolated);
    worker.send(WorkerResponse::StorageStatus { status: status.clone() });
    worker.send(WorkerResponse::CheckCrossOriginResources);
    worker.send(WorkerResponse::Ready);
    coordinator.ready().await.unwrap();

    assert_eq!(events.recv().await.unwrap(), WorkerEvent::StorageStatus(status.clone()));
    match events.recv().await.unwrap() {
        WorkerEvent::CrossOriginReport(report) => {
            assert_eq!(report.inspected, 2);
            assert_eq!(report.cross_origin, vec!["https://cdn.example/lib.js".to_owned()]);
        },
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(events.recv().await.unwrap(), WorkerEvent::Ready);
    assert_eq!(coordinator.storage_status(), Some(status));
}

#[tokio::test]
async fn test_queries_sent_with_wire_params() {
    let (coordinator, mut worker) = start(CoordinatorConfig::default());
    worker.send(WorkerResponse::Ready);
    let client = coordinator.ready().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call(
                    "INSERT INTO t VALUES (?, ?, ?, ?)",
                    vec![SqlValue::Null, SqlValue::Real(1.5), SqlValue::from("x"), SqlValue::Blob(vec![1, 2])],
                    QueryMethod::Run,
                )
                .await
        }
    });
    let (id, _, params) = worker.next_query().await;
    assert_eq!(params, vec![json!(null), json!(1.5), json!("x"), json!([1, 2])]);
    worker.respond(&id, json!([]));
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_as_async_executor() {
    let (coordinator, mut worker) = start(CoordinatorConfig::default());
    worker.send(WorkerResponse::Ready);
    let executor: Arc<dyn AsyncExecutor> = Arc::new(coordinator.ready().await.unwrap());

    let call = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.execute("SELECT 1", vec![], QueryMethod::Values).await }
    });
    let (id, sql, _) = worker.next_query().await;
    assert_eq!(sql, "SELECT 1");
    worker.respond(&id, json!([[1]]));
    assert_eq!(call.await.unwrap().unwrap(), QueryOutput::Rows(vec![vec![SqlValue::Integer(1)]]));
}

mod end_to_end {
    use std::collections::BTreeMap;

    use localstore_core::{JournalEntry, MigrationConfig};
    use localstore_worker::{HostConfig, NativeHost, WorkerHandle, spawn_worker};
    use tempfile::TempDir;

    use super::*;
    use crate::{RpcClient, migrate};

    async fn boot(dir: &TempDir) -> (Coordinator, RpcClient, std::thread::JoinHandle<()>) {
        let host = NativeHost::new(HostConfig { storage_root: Some(dir.path().to_path_buf()), ..HostConfig::default() });
        let WorkerHandle { sender, receiver, thread } = spawn_worker(host, MigrationConfig::default()).unwrap();
        let coordinator = Coordinator::start(CoordinatorConfig::default(), sender, receiver);
        let client = coordinator.ready().await.unwrap();
        (coordinator, client, thread)
    }

    fn notes_journal(second_script: &str) -> MigrationConfig {
        let mut scripts = BTreeMap::new();
        scripts.insert("m0000".to_owned(), "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)".to_owned());
        scripts.insert("m0001".to_owned(), second_script.to_owned());
        let entries = vec![
            JournalEntry { idx: 0, when: 1_742_000_333_611, tag: "0000_notes".to_owned(), breakpoints: true },
            JournalEntry { idx: 1, when: 1_742_000_444_222, tag: "0001_seed".to_owned(), breakpoints: true },
        ];
        MigrationConfig::new(entries, scripts)
    }

    #[tokio::test]
    async fn test_worker_binding_error_keeps_its_kind() {
        let dir = TempDir::new().unwrap();
        let (coordinator, client, thread) = boot(&dir).await;

        match client.get("SELECT ?, ?", vec![SqlValue::Integer(1)]).await {
            Err(StoreError::Binding(message)) => assert!(message.contains("Expected 2 parameters, got 1")),
            other => panic!("unexpected {other:?}"),
        }

        drop(client);
        coordinator.close().await.unwrap();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_migrate_through_client() {
        let dir = TempDir::new().unwrap();
        let (coordinator, client, thread) = boot(&dir).await;
        let journal = notes_journal("INSERT INTO notes (body) VALUES ('hello')");

        let report = migrate(&client, &journal).await.unwrap();
        assert_eq!(report.applied.iter().map(|m| m.tag.as_str()).collect::<Vec<_>>(), ["0000_notes", "0001_seed"]);
        assert_eq!(client.values("SELECT body FROM notes", vec![]).await.unwrap(), vec![vec![SqlValue::from("hello")]]);

        let again = migrate(&client, &journal).await.unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(again.skipped, 2);

        drop(client);
        coordinator.close().await.unwrap();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_failed_migration_through_client_rolls_back() {
        let dir = TempDir::new().unwrap();
        let (coordinator, client, thread) = boot(&dir).await;

        let err = migrate(&client, &notes_journal("INSERT INTO missing VALUES (1)")).await.unwrap_err();
        assert!(matches!(err, StoreError::Engine(ref m) if m.contains("no such table")));
        let notes = client
            .get("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?", vec!["notes".into()])
            .await
            .unwrap();
        assert_eq!(notes, None);

        // Rolled back cleanly, so a fixed journal applies from scratch.
        let report = migrate(&client, &notes_journal("INSERT INTO notes (body) VALUES ('ok')")).await.unwrap();
        assert_eq!(report.applied.len(), 2);

        drop(client);
        coordinator.close().await.unwrap();
        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_real_worker_round_trip() {
        let dir = TempDir::new().unwrap();
        let host = NativeHost::new(HostConfig {
            storage_root: Some(dir.path().to_path_buf()),
            document_url: None,
            ..HostConfig::default()
        });
        let worker = spawn_worker(host, MigrationConfig::default()).unwrap();
        let coordinator = Coordinator::start(
            CoordinatorConfig { db_name: "e2e".to_owned(), ..CoordinatorConfig::default() },
            worker.sender,
            worker.receiver,
        );
        let client = coordinator.ready().await.unwrap();
        assert!(coordinator.storage_status().unwrap().is_persistent());

        client.run("CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)", vec![]).await.unwrap();
        client.run("INSERT INTO users VALUES (?, ?)", vec!["1".into(), "A".into()]).await.unwrap();
        assert_eq!(
            client.get("SELECT id, name FROM users WHERE id = ?", vec!["1".into()]).await.unwrap(),
            Some(vec![SqlValue::from("1"), SqlValue::from("A")])
        );
        client.run("DELETE FROM users", vec![]).await.unwrap();
        assert_eq!(client.all("SELECT * FROM users", vec![]).await.unwrap(), Vec::<Vec<SqlValue>>::new());

        let err = client.get("SELECT * FROM nope", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("no such table"));

        assert!(coordinator.logs().iter().any(|l| l.message.contains("Persisted storage")));
        drop(client);
        coordinator.close().await.unwrap();
        worker.thread.join().unwrap();
        assert!(dir.path().join("e2e.sqlite3").exists());
    }
}
