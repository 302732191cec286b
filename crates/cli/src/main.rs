use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use localstore_client::{ChildProcess, Coordinator, CoordinatorConfig, spawn_child};
use localstore_core::MigrationConfig;
use localstore_worker::{WorkerConfig, spawn_native};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "localstore")]
#[command(about = "Worker-owned SQLite storage with persistence diagnostics", long_about = None)]
struct Cli {
    #[command(flatten)]
    host: HostArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `LOCALSTORE_*` environment settings.
#[derive(Args, Clone, Default)]
struct HostArgs {
    /// Storage root directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Database name sent in the setup handshake
    #[arg(long, global = true)]
    db_name: Option<String>,
    /// Behave as an insecure context
    #[arg(long, global = true)]
    insecure: bool,
    /// Behave as a context without cross-origin isolation
    #[arg(long, global = true)]
    not_isolated: bool,
    #[arg(long, global = true)]
    quota_bytes: Option<u64>,
    /// URL fetched to read the isolation headers
    #[arg(long, global = true)]
    document_url: Option<String>,
    /// drizzle-kit migrations folder applied at worker start
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,
    /// Per-query deadline in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Run the worker as a `worker-stdio` child process
    #[arg(long, global = true)]
    out_of_process: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a worker and print its storage status
    Status,
    /// Run one statement and print the rows
    Query {
        #[arg(short, long, default_value = "all")]
        method: String,
        sql: String,
        /// JSON array of positional parameters
        params: Option<String>,
    },
    /// Apply a migrations folder to the database
    Migrate { dir: PathBuf },
    /// Serve the worker protocol over stdin/stdout
    WorkerStdio,
}

/// Resolved settings for both sides of the protocol.
struct Settings {
    worker: WorkerConfig,
    coordinator: CoordinatorConfig,
    migrations_dir: Option<PathBuf>,
    out_of_process: bool,
}

impl Settings {
    fn resolve(args: HostArgs) -> Result<Self> {
        let mut worker = WorkerConfig::from_env()?;
        let mut coordinator = CoordinatorConfig::from_env();

        if let Some(dir) = args.data_dir {
            worker.host.storage_root = Some(dir);
        }
        if args.insecure {
            worker.host.secure_context = false;
        }
        if args.not_isolated {
            worker.host.cross_origin_isolated = false;
        }
        if args.quota_bytes.is_some() {
            worker.host.quota_bytes = args.quota_bytes;
        }
        if let Some(url) = args.document_url {
            worker.host.document_url = Some(url.clone());
            coordinator.document_url = Some(url);
        }
        if let Some(name) = args.db_name {
            coordinator.db_name = name;
        }
        if let Some(ms) = args.timeout_ms {
            coordinator.query_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        let migrations_dir = match args.migrations {
            Some(dir) => {
                worker.migrations = MigrationConfig::from_dir(&dir)?;
                Some(dir)
            },
            None => std::env::var_os("LOCALSTORE_MIGRATIONS_DIR").map(PathBuf::from),
        };

        Ok(Self { worker, coordinator, migrations_dir, out_of_process: args.out_of_process })
    }

    fn database_path(&self) -> Result<PathBuf> {
        let root = self
            .worker
            .host
            .storage_root
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No storage root: set --data-dir or LOCALSTORE_DATA_DIR"))?;
        std::fs::create_dir_all(&root)?;
        Ok(localstore_worker::database_path(root, &self.coordinator.db_name))
    }
}

/// Where the worker runs.
enum WorkerProcess {
    Thread(std::thread::JoinHandle<()>),
    Child(ChildProcess),
}

impl WorkerProcess {
    async fn finish(self) -> Result<()> {
        match self {
            Self::Thread(handle) => tokio::task::spawn_blocking(move || handle.join())
                .await?
                .map_err(|_| anyhow::anyhow!("worker thread panicked")),
            Self::Child(child) => {
                let status = child.wait().await?;
                tracing::debug!(%status, "Worker process exited");
                Ok(())
            },
        }
    }
}

/// Start a worker and attach a coordinator to it.
fn boot(settings: &Settings) -> Result<(Coordinator, WorkerProcess)> {
    if settings.out_of_process {
        let mut command = tokio::process::Command::new(std::env::current_exe()?);
        command.arg("worker-stdio");
        let host = &settings.worker.host;
        command.env("LOCALSTORE_SECURE_CONTEXT", host.secure_context.to_string());
        command.env("LOCALSTORE_CROSS_ORIGIN_ISOLATED", host.cross_origin_isolated.to_string());
        if let Some(root) = &host.storage_root {
            command.env("LOCALSTORE_DATA_DIR", root);
        }
        if let Some(quota) = host.quota_bytes {
            command.env("LOCALSTORE_QUOTA_BYTES", quota.to_string());
        }
        if let Some(url) = &host.document_url {
            command.env("LOCALSTORE_DOCUMENT_URL", url);
        }
        if let Some(dir) = &settings.migrations_dir {
            command.env("LOCALSTORE_MIGRATIONS_DIR", dir);
        }
        let child = spawn_child(command)?;
        let coordinator = Coordinator::start(settings.coordinator.clone(), child.sender, child.receiver);
        return Ok((coordinator, WorkerProcess::Child(child.process)));
    }

    let handle = spawn_native(settings.worker.clone())?;
    let coordinator = Coordinator::start(settings.coordinator.clone(), handle.sender, handle.receiver);
    Ok((coordinator, WorkerProcess::Thread(handle.thread)))
}

/// Close the coordinator, then wait for the worker to stop.
async fn shutdown(coordinator: Coordinator, worker: WorkerProcess) -> Result<()> {
    coordinator.close().await?;
    worker.finish().await
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(cli.host)?;

    match cli.command {
        // The stdio worker is fully synchronous.
        Commands::WorkerStdio => commands::worker_stdio::run(settings.worker),
        Commands::Migrate { dir } => commands::migrate::run(&settings, &dir),
        Commands::Status => block_on(commands::status::run(&settings)),
        Commands::Query { method, sql, params } => {
            block_on(commands::query::run(&settings, &method, &sql, params.as_deref()))
        },
    }
}

fn block_on(future: impl Future<Output = Result<()>>) -> Result<()> {
    tokio::runtime::Runtime::new()?.block_on(future)
}
