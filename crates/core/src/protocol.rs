//! Envelopes exchanged between the coordinator and the storage worker.
//!
//! Both directions are internally tagged on `type` so that a frame is a
//! single JSON object, e.g. `{"type":"query","id":"..","sql":"..","params":[],"method":"all"}`.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::status::StorageStatus;
use crate::value::{SqlValue, row_from_json, row_to_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMethod {
    Run,
    All,
    Values,
    Get,
}

impl QueryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::All => "all",
            Self::Values => "values",
            Self::Get => "get",
        }
    }
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(Self::Run),
            "all" => Ok(Self::All),
            "values" => Ok(Self::Values),
            "get" => Ok(Self::Get),
            other => Err(StoreError::Protocol(format!("unknown query method: {other}"))),
        }
    }
}

/// Coordinator → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Setup {
        #[serde(rename = "dbName")]
        db_name: String,
    },
    Query {
        id: String,
        sql: String,
        #[serde(default)]
        params: Vec<JsonValue>,
        method: QueryMethod,
    },
}

/// Worker → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerResponse {
    RequestSetup,
    Response {
        id: String,
        result: QueryResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ready,
    Log {
        payload: String,
    },
    Error {
        payload: String,
    },
    StorageStatus {
        status: StorageStatus,
    },
    CheckCrossOriginResources,
}

impl WorkerResponse {
    pub fn success(id: String, output: QueryOutput) -> Self {
        Self::Response { id, result: output.into_wire(), error: None }
    }

    pub fn failure(id: String, err: &StoreError) -> Self {
        Self::Response { id, result: QueryResult::empty(), error: Some(err.wire_message()) }
    }
}

/// `result` member of a `response` envelope. The shape of `rows` depends on
/// the method of the originating query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub rows: JsonValue,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self { rows: JsonValue::Array(Vec::new()) }
    }
}

/// Typed outcome of one statement execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// `run`: executed for effect.
    Done,
    /// `get`: `None` when no row was produced. `Some(vec![])` is a row with
    /// zero columns, which is not the same thing.
    Row(Option<Vec<SqlValue>>),
    /// `all` / `values`.
    Rows(Vec<Vec<SqlValue>>),
}

impl QueryOutput {
    pub fn into_wire(self) -> QueryResult {
        let rows = match self {
            Self::Done => JsonValue::Array(Vec::new()),
            Self::Row(None) => JsonValue::Null,
            Self::Row(Some(row)) => row_to_json(&row),
            Self::Rows(rows) => JsonValue::Array(rows.iter().map(|r| row_to_json(r)).collect()),
        };
        QueryResult { rows }
    }

    /// Interpret a wire result using the method of the query it answers.
    pub fn from_wire(method: QueryMethod, result: &QueryResult) -> Result<Self> {
        match method {
            QueryMethod::Run => Ok(Self::Done),
            QueryMethod::Get => match &result.rows {
                JsonValue::Null => Ok(Self::Row(None)),
                row => row_from_json(row).map(|r| Self::Row(Some(r))),
            },
            QueryMethod::All | QueryMethod::Values => match &result.rows {
                JsonValue::Array(rows) => {
                    rows.iter().map(row_from_json).collect::<Result<Vec<_>>>().map(Self::Rows)
                },
                other => Err(StoreError::Protocol(format!(
                    "expected an array of rows for {method}, got {other}"
                ))),
            },
        }
    }

    pub fn into_row(self) -> Option<Vec<SqlValue>> {
        match self {
            Self::Row(row) => row,
            Self::Rows(rows) => rows.into_iter().next(),
            Self::Done => None,
        }
    }

    pub fn into_rows(self) -> Vec<Vec<SqlValue>> {
        match self {
            Self::Rows(rows) => rows,
            Self::Row(row) => row.into_iter().collect(),
            Self::Done => Vec::new(),
        }
    }
}

/// Fresh correlation id. UUIDv7 is time-ordered, so ids never collide within
/// a worker's lifetime.
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Encode an envelope as one newline-free JSON frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim()).map_err(|e| StoreError::Protocol(format!("bad frame: {e}")))
}
