//! Core types for localstore
//!
//! Shared by the storage worker and the coordinator: the envelope protocol,
//! SQL values, storage diagnostics, migration journals and the error type.

mod env_config;
mod error;
mod migration_config;
mod migration_log;
mod protocol;
mod status;
mod value;

pub use env_config::{env_parse_optional, env_parse_with_default};
pub use error::*;
pub use migration_config::*;
pub use migration_log::*;
pub use protocol::*;
pub use status::*;
pub use value::*;
