use std::io;
use std::result::Result as StdResult;

use thiserror::Error;

/// Errors that can occur in localstore
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL failed inside the engine (syntax, constraint violation, ...).
    #[error("Engine error: {0}")]
    Engine(String),

    /// A bound parameter had an unsupported type or the count was wrong.
    #[error("Binding error: {0}")]
    Binding(String),

    /// The durable backend could not be opened.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// Malformed or unexpected envelope.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("database not ready")]
    NotReady,

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Query timed out after {0} ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Message carried in a `response` envelope's `error` field.
    ///
    /// Engine errors travel verbatim so callers see the engine's own text.
    pub fn wire_message(&self) -> String {
        match self {
            Self::Engine(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from a `response` envelope's `error` field.
    ///
    /// Recognizes the prefixes written by [`wire_message`](Self::wire_message);
    /// any other text is an engine message.
    pub fn from_wire(message: String) -> Self {
        if message == Self::NotReady.to_string() {
            return Self::NotReady;
        }
        let kinds: [(&str, fn(String) -> Self); 5] = [
            ("Binding error: ", Self::Binding),
            ("Migration error: ", Self::Migration),
            ("Storage unavailable: ", Self::StorageUnavailable),
            ("Protocol error: ", Self::Protocol),
            ("Configuration error: ", Self::Config),
        ];
        for (prefix, kind) in kinds {
            if let Some(rest) = message.strip_prefix(prefix) {
                return kind(rest.to_owned());
            }
        }
        Self::Engine(message)
    }
}

pub type Result<T> = StdResult<T, StoreError>;
