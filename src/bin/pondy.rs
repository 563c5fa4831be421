use clap::Parser;
use pondy::actors::alert::{AlertActor, AlertHandle};
use pondy::actors::messages::{AlertCommand, StorageCommand, SupervisorCommand};
use pondy::actors::storage::{StorageActor, StoreHandle};
use pondy::actors::supervisor::{SupervisorActor, SupervisorHandle};
use pondy::config::{read_config_file, StorageConfig};
use pondy::store::memory::MemoryBackend;
use pondy::store::StorageBackend;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "storage-sqlite")]
use pondy::store::sqlite::SqliteBackend;

const SAMPLE_CHANNEL_CAPACITY: usize = 256;
const STATUS_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: String,
}

fn init_logging() {
    let filter = filter::Targets::new().with_targets(vec![("pondy", LevelFilter::TRACE)]);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match read_config_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to read configuration: {e}");
            std::process::exit(1);
        }
    };

    let resolved = match config.resolve() {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    info!("resolved configuration: {} targets", resolved.targets.len());

    let backend: Box<dyn StorageBackend> = match initialize_backend(&resolved.storage).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("failed to initialize storage backend: {e}");
            std::process::exit(2);
        }
    };

    match run(resolved, backend).await {
        Ok(ShutdownReason::Signal) => std::process::exit(130),
        Ok(ShutdownReason::Clean) => std::process::exit(0),
        Err(e) => {
            error!("fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}

enum ShutdownReason {
    Signal,
    Clean,
}

async fn initialize_backend(storage: &StorageConfig) -> anyhow::Result<Box<dyn StorageBackend>> {
    match storage {
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            info!("initializing SQLite backend at {path:?}");
            let backend = SqliteBackend::new(path).await?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            warn!("storage-sqlite feature disabled; falling back to in-memory storage");
            Ok(Box::new(MemoryBackend::new()))
        }
        StorageConfig::None => {
            info!("using in-memory storage (no persistence)");
            Ok(Box::new(MemoryBackend::new()))
        }
    }
}

async fn run(config: pondy::config::ResolvedConfig, backend: Box<dyn StorageBackend>) -> anyhow::Result<ShutdownReason> {
    let (sample_tx, _sample_rx) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
    let (status_tx, _status_rx) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

    let (storage_cmd_tx, storage_cmd_rx) = mpsc::channel::<StorageCommand>(COMMAND_CHANNEL_CAPACITY);
    let (retention_days, cleanup_interval_hours) = match &config.storage {
        StorageConfig::Sqlite {
            retention_days,
            cleanup_interval_hours,
            ..
        } => (Some(*retention_days), *cleanup_interval_hours),
        StorageConfig::None => (None, 24),
    };
    let storage_actor = StorageActor::new(backend, storage_cmd_rx, sample_tx.subscribe(), retention_days, cleanup_interval_hours);
    let storage_task = tokio::spawn(storage_actor.run());
    let store_handle = StoreHandle::new(storage_cmd_tx);
    info!("storage actor started");

    let (alert_cmd_tx, alert_cmd_rx) = mpsc::channel::<AlertCommand>(COMMAND_CHANNEL_CAPACITY);
    let alert_actor = AlertActor::new(
        config.alerting.rules.clone(),
        &config.alerting.channels,
        config.alerting.cooldown_secs,
        store_handle.clone(),
        sample_tx.subscribe(),
        alert_cmd_rx,
    );
    let alert_task = tokio::spawn(alert_actor.run());
    let alert_handle = AlertHandle::new(alert_cmd_tx);
    info!("alert actor started");

    let (supervisor_cmd_tx, supervisor_cmd_rx) = mpsc::channel::<SupervisorCommand>(COMMAND_CHANNEL_CAPACITY);
    let supervisor_actor = SupervisorActor::new(supervisor_cmd_rx, sample_tx.clone(), status_tx.clone());
    let supervisor_task = tokio::spawn(supervisor_actor.run());
    let supervisor_handle = SupervisorHandle::new(supervisor_cmd_tx);
    info!("supervisor actor started");

    supervisor_handle.apply_config(config).await?;
    info!("all actors started, monitoring active");

    let reason = match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal, stopping actors...");
            ShutdownReason::Signal
        }
        Err(e) => {
            error!("unable to listen for shutdown signal: {e}");
            ShutdownReason::Clean
        }
    };

    info!("shutting down supervisor (scrapers)...");
    supervisor_handle.shutdown().await?;
    let _ = supervisor_task.await;

    info!("shutting down alert actor...");
    alert_handle.shutdown().await;
    let _ = alert_task.await;

    info!("shutting down storage actor...");
    store_handle.shutdown().await;
    let _ = storage_task.await;

    info!("all actors stopped, exiting");
    Ok(reason)
}
