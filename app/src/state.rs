//! Pipeline assembly from configuration.

use anyhow::Context;
use leadgen_core::AppConfig;
use leadgen_db::Database;
use leadgen_reveal::{
    callback_url, spawn_sweeper, CallbackReceiver, JsonFileCache, PendingRequestTable,
    RateLimiter, RevealOrchestrator, SignalHireClient, WorkerStats,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Load, override from the environment, and validate configuration.
///
/// An explicit `path` must exist; otherwise the default location is used and
/// a missing file means defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?.with_env_overrides(),
        None => AppConfig::load_with_env()?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Database file: configured path or `leadgen.db` in the data directory.
pub fn database_path(config: &AppConfig) -> anyhow::Result<PathBuf> {
    match &config.storage.database_path {
        Some(path) => Ok(path.clone()),
        None => Ok(AppConfig::data_dir()?.join("leadgen.db")),
    }
}

/// Contact cache file: configured path or `contacts.json` in the cache directory.
pub fn cache_path(config: &AppConfig) -> anyhow::Result<PathBuf> {
    match &config.storage.cache_path {
        Some(path) => Ok(path.clone()),
        None => Ok(AppConfig::cache_dir()?.join("contacts.json")),
    }
}

/// Open the database and bring its schema up to date.
pub async fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let path = database_path(config)?;
    let db = Database::open(&path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    db.run_migrations().await.context("failed to migrate database")?;
    Ok(db)
}

/// Webhook receiver running in the background.
pub struct ReceiverTasks {
    /// Table shared with the orchestrator
    pub table: Arc<PendingRequestTable>,
    /// Address the listener is bound to
    pub local_addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<leadgen_reveal::Result<()>>,
    worker: JoinHandle<WorkerStats>,
    sweeper: JoinHandle<()>,
}

impl ReceiverTasks {
    /// Bind the receiver and spawn it with its worker and deadline sweeper.
    pub async fn start(config: &AppConfig) -> anyhow::Result<Self> {
        let table = Arc::new(PendingRequestTable::new(Duration::from_secs(
            config.reveal.retention_secs,
        )));
        let (receiver, worker) =
            CallbackReceiver::new(table.clone(), config.receiver.queue_capacity);

        let listener = TcpListener::bind(&config.receiver.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.receiver.bind_addr))?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let server = tokio::spawn(receiver.serve(listener, shutdown.clone()));
        let worker = worker.spawn();
        let sweeper = spawn_sweeper(
            table.clone(),
            Duration::from_secs(config.reveal.sweep_interval_secs),
            shutdown.clone(),
        );

        Ok(Self {
            table,
            local_addr,
            shutdown,
            server,
            worker,
            sweeper,
        })
    }

    /// Stop the server, drain the worker and return its statistics.
    pub async fn shutdown(self) -> anyhow::Result<WorkerStats> {
        self.shutdown.cancel();
        self.server
            .await
            .context("receiver task panicked")?
            .context("receiver failed")?;
        self.sweeper.await.context("sweeper task panicked")?;
        let stats = self.worker.await.context("worker task panicked")?;
        tracing::debug!(?stats, "receiver stopped");
        Ok(stats)
    }
}

/// Everything a reveal run needs.
pub struct Pipeline {
    /// Orchestrator wired to the provider, limiter, table and cache
    pub orchestrator: RevealOrchestrator,
    /// Contact cache
    pub cache: Arc<JsonFileCache>,
    /// Running receiver
    pub receiver: ReceiverTasks,
}

impl Pipeline {
    /// Build the provider client, cache and limiter, and start the receiver.
    pub async fn start(config: &AppConfig) -> anyhow::Result<Self> {
        let provider = Arc::new(
            SignalHireClient::new(&config.provider).context("failed to create provider client")?,
        );
        let cache_file = cache_path(config)?;
        let cache = Arc::new(
            JsonFileCache::open(&cache_file)
                .await
                .with_context(|| format!("failed to open cache {}", cache_file.display()))?,
        );
        let limiter = Arc::new(RateLimiter::new(&config.limiter));
        let receiver = ReceiverTasks::start(config).await?;

        let orchestrator = RevealOrchestrator::new(
            provider,
            limiter,
            receiver.table.clone(),
            callback_url(&config.receiver.public_url),
        )
        .with_cache(cache.clone());

        Ok(Self {
            orchestrator,
            cache,
            receiver,
        })
    }
}
