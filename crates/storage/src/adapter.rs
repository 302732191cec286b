//! Statement-oriented access to one SQLite connection.
//!
//! Every call is one SQL text plus positional parameters, executed in one of
//! four shapes (`run`, `get`, `all`, `values`). Rows come back as ordered
//! value sequences in column order.

use std::path::Path;

use localstore_core::{MigrationConfig, MigrationReport, QueryMethod, QueryOutput, Result, SqlValue, StoreError};
use rusqlite::types::{Value, ValueRef};
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Connection, OpenFlags, Row, Statement};
use serde_json::Value as JsonValue;

use crate::migrations::run_migrations;

pub(crate) fn engine_error(e: rusqlite::Error) -> StoreError {
    StoreError::Engine(e.to_string())
}

/// Anything that can execute one statement in one of the four shapes.
///
/// Query builders plug in here: they emit SQL text plus positional
/// parameters and expect rows back.
pub trait Executor {
    fn execute(&self, sql: &str, params: &[SqlValue], method: QueryMethod) -> Result<QueryOutput>;
}

/// Execute one statement against `conn`.
///
/// `run` without parameters goes through the batch path, so it accepts
/// several `;`-separated statements. Everything else is prepared, bound,
/// stepped and finalized.
pub fn execute(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    method: QueryMethod,
) -> Result<QueryOutput> {
    if method == QueryMethod::Run && params.is_empty() {
        return run_batch(conn, sql);
    }

    let mut stmt = conn.prepare(sql).map_err(engine_error)?;
    bind_all(&mut stmt, params)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

    let mut rows = stmt.raw_query();
    match method {
        QueryMethod::Run => {
            while rows.next().map_err(engine_error)?.is_some() {}
            Ok(QueryOutput::Done)
        },
        QueryMethod::Get => match rows.next().map_err(engine_error)? {
            Some(row) => read_row(row, &columns).map(|r| QueryOutput::Row(Some(r))),
            None => Ok(QueryOutput::Row(None)),
        },
        QueryMethod::All | QueryMethod::Values => {
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(engine_error)? {
                out.push(read_row(row, &columns)?);
            }
            Ok(QueryOutput::Rows(out))
        },
    }
}

/// Step every statement of `sql` in order.
///
/// Each statement still goes through the parameter count check, so a `?`
/// in the text fails with a binding error instead of binding NULL.
/// Statements before the failing one have already run.
fn run_batch(conn: &Connection, sql: &str) -> Result<QueryOutput> {
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next().map_err(engine_error)? {
        bind_all(&mut stmt, &[])?;
        let mut rows = stmt.raw_query();
        while rows.next().map_err(engine_error)?.is_some() {}
    }
    Ok(QueryOutput::Done)
}

/// Decode wire parameters, then execute. A parameter that cannot be bound
/// fails this call only.
pub fn execute_wire(
    conn: &Connection,
    sql: &str,
    params: &[JsonValue],
    method: QueryMethod,
) -> Result<QueryOutput> {
    let params = params.iter().map(SqlValue::from_json).collect::<Result<Vec<_>>>()?;
    execute(conn, sql, &params, method)
}

fn bind_all(stmt: &mut Statement<'_>, params: &[SqlValue]) -> Result<()> {
    let expected = stmt.parameter_count();
    if params.len() != expected {
        return Err(StoreError::Binding(format!(
            "Expected {expected} parameters, got {}",
            params.len()
        )));
    }
    for (i, param) in params.iter().enumerate() {
        // Integers and reals bind through separate engine calls.
        let value = match param {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(v) => Value::Integer(*v),
            SqlValue::Real(v) => Value::Real(*v),
            SqlValue::Text(v) => Value::Text(v.clone()),
            SqlValue::Blob(v) => Value::Blob(v.clone()),
        };
        stmt.raw_bind_parameter(i + 1, value).map_err(|e| {
            StoreError::Binding(format!("parameter {}: {e}", i + 1))
        })?;
    }
    Ok(())
}

fn read_row(row: &Row<'_>, columns: &[String]) -> Result<Vec<SqlValue>> {
    columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let value = row.get_ref(i).map_err(|e| {
                StoreError::Engine(format!("reading column {name}: {e}"))
            })?;
            Ok(match value {
                ValueRef::Null => SqlValue::Null,
                ValueRef::Integer(v) => SqlValue::Integer(v),
                ValueRef::Real(v) => SqlValue::Real(v),
                ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StoreError::Engine(format!("column {name} holds text that is not valid UTF-8: {e}"))
                })?),
                ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
            })
        })
        .collect()
}

/// Owns one connection and exposes the four query shapes over it.
pub struct Adapter {
    conn: Connection,
}

impl Adapter {
    /// Open (or create) a file-backed database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| StoreError::StorageUnavailable(format!("{}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(engine_error)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(engine_error)?;
        conn.pragma_update(None, "busy_timeout", 5000i32).map_err(engine_error)?;
        tracing::debug!(path = %path.display(), "opened file-backed database");
        Ok(Self { conn })
    }

    /// Volatile database, lost when the adapter is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(engine_error)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// File backing this database, `None` for in-memory.
    pub fn filename(&self) -> Option<String> {
        self.conn.path().filter(|p| !p.is_empty()).map(ToOwned::to_owned)
    }

    pub fn run(&self, sql: &str, params: &[SqlValue]) -> Result<()> {
        execute(&self.conn, sql, params, QueryMethod::Run).map(|_| ())
    }

    pub fn get(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Vec<SqlValue>>> {
        execute(&self.conn, sql, params, QueryMethod::Get).map(QueryOutput::into_row)
    }

    pub fn all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        execute(&self.conn, sql, params, QueryMethod::All).map(QueryOutput::into_rows)
    }

    pub fn values(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        execute(&self.conn, sql, params, QueryMethod::Values).map(QueryOutput::into_rows)
    }

    pub fn execute_wire(&self, sql: &str, params: &[JsonValue], method: QueryMethod) -> Result<QueryOutput> {
        execute_wire(&self.conn, sql, params, method)
    }

    /// Bring the schema up to date with `config`.
    pub fn migrate(&self, config: &MigrationConfig) -> Result<MigrationReport> {
        run_migrations(self, config)
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| engine_error(e))
    }
}

impl Executor for Adapter {
    fn execute(&self, sql: &str, params: &[SqlValue], method: QueryMethod) -> Result<QueryOutput> {
        execute(&self.conn, sql, params, method)
    }
}
