use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use remote_monitoring::{
    alerts::AlertNotifier,
    collector::TelemetryService,
    config::{Config, StorageConfig, read_config_file},
    storage::{MemoryBackend, StorageBackend},
    util::get_webhook_secret,
    webhook::ActionDispatcher,
};
use tokio::spawn;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const RETENTION_SWEEP: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Log level for the hub's own output
    #[arg(long, default_value = "trace")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("remote_monitoring", level),
        ("monitoring_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let storage = config.storage.clone().unwrap_or_default();
    let store = open_store(&storage).await?;

    let notifier = config.alerts.notify_url.clone().map(AlertNotifier::new);

    let signing_secret = get_webhook_secret().or_else(|| config.webhook.signing_secret.clone());
    if signing_secret.is_none() {
        warn!("no webhook signing secret configured, signatures are not checked");
    }
    let dispatcher = Arc::new(
        ActionDispatcher::new(store.clone())
            .with_signing_secret(signing_secret, config.webhook.require_signature)
            .with_notifier(notifier.clone()),
    );

    let telemetry = Arc::new(
        TelemetryService::ssh(store.clone(), &config.ssh)
            .with_log_lines(config.polling.log_lines)
            .with_notifier(notifier),
    );
    register_hosts(&telemetry, &config).await;

    #[cfg(feature = "api")]
    serve_api(&config, dispatcher, telemetry.clone(), store.clone()).await?;
    #[cfg(not(feature = "api"))]
    drop(dispatcher);

    let mut tasks: Vec<JoinHandle<()>> = vec![];
    if let Some(interval) = config.polling.interval_secs {
        tasks.push(spawn(polling_loop(
            telemetry.clone(),
            Duration::from_secs(interval.max(1)),
        )));
    }
    if let StorageConfig::Sqlite { retention_days, .. } = storage {
        tasks.push(spawn(retention_loop(store.clone(), retention_days)));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    for task in &tasks {
        task.abort();
    }

    for (host_id, e) in telemetry.pool().drain_all().await {
        error!("failed to close session for host {host_id}: {e}");
    }

    if let Err(e) = store.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}

async fn open_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match storage {
        StorageConfig::None => {
            info!("using in-memory storage, nothing is persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            use remote_monitoring::storage::sqlite::SqliteBackend;

            let backend = SqliteBackend::new(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

async fn register_hosts(telemetry: &TelemetryService, config: &Config) {
    for host in &config.managed_hosts {
        match host.connection_config() {
            Ok(connection) => telemetry.register(host.host_id, connection).await,
            Err(e) => error!("skipping managed host {}: {e:#}", host.host_id),
        }
    }
}

#[cfg(feature = "api")]
async fn serve_api(
    config: &Config,
    dispatcher: Arc<ActionDispatcher>,
    telemetry: Arc<TelemetryService>,
    store: Arc<dyn StorageBackend>,
) -> anyhow::Result<()> {
    use remote_monitoring::api::{ApiConfig, ApiState, spawn_api_server};
    use remote_monitoring::util::{get_addr, get_token};

    let mut api_config = ApiConfig::from(config.api.clone());
    api_config.bind_addr = get_addr(api_config.bind_addr);
    if let Some(token) = get_token() {
        api_config.auth_token = Some(token);
    }
    if api_config.auth_token.is_none() {
        warn!("admin routes are not protected by a token");
    }

    let state = ApiState::new(dispatcher, telemetry, store);
    spawn_api_server(api_config, state).await?;
    Ok(())
}

#[instrument(skip_all)]
async fn polling_loop(telemetry: Arc<TelemetryService>, interval: Duration) {
    debug!("polling managed hosts every {interval:?}");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        for (host_id, result) in telemetry.poll_all().await {
            match result {
                Ok(report) => trace!("host {host_id}: {}", report.status),
                Err(e) => error!("host {host_id}: {e}"),
            }
        }
    }
}

#[instrument(skip(store))]
async fn retention_loop(store: Arc<dyn StorageBackend>, retention_days: u32) {
    let mut ticker = tokio::time::interval(RETENTION_SWEEP);
    loop {
        ticker.tick().await;

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        match store.cleanup_old_snapshots(cutoff).await {
            Ok(0) => trace!("no snapshots older than {retention_days} days"),
            Ok(removed) => info!("removed {removed} snapshot(s) older than {retention_days} days"),
            Err(e) => error!("retention cleanup failed: {e}"),
        }
    }
}
