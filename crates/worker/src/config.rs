use std::path::PathBuf;

use localstore_core::{MigrationConfig, Result, env_parse_optional, env_parse_with_default};

use crate::probe::HostConfig;

/// `<local data dir>/localstore`, `None` when the platform has no such directory.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("localstore"))
}

/// Everything the storage worker needs before it receives `setup`.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    pub host: HostConfig,
    pub migrations: MigrationConfig,
}

impl WorkerConfig {
    /// Build from `LOCALSTORE_*` environment variables.
    ///
    /// Only a migrations folder that exists but cannot be read is an error;
    /// malformed scalar values fall back to their defaults with a warning.
    pub fn from_env() -> Result<Self> {
        let defaults = HostConfig::default();
        let host = HostConfig {
            secure_context: env_parse_with_default("LOCALSTORE_SECURE_CONTEXT", defaults.secure_context),
            cross_origin_isolated: env_parse_with_default(
                "LOCALSTORE_CROSS_ORIGIN_ISOLATED",
                defaults.cross_origin_isolated,
            ),
            storage_root: env_parse_optional::<PathBuf>("LOCALSTORE_DATA_DIR").or(defaults.storage_root),
            quota_bytes: env_parse_optional("LOCALSTORE_QUOTA_BYTES"),
            document_url: env_parse_optional("LOCALSTORE_DOCUMENT_URL"),
        };

        let migrations = match env_parse_optional::<PathBuf>("LOCALSTORE_MIGRATIONS_DIR") {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Loading migrations");
                MigrationConfig::from_dir(&dir)?
            },
            None => MigrationConfig::default(),
        };

        Ok(Self { host, migrations })
    }
}
