use std::sync::Arc;

use anyhow::Context;
use chrono::FixedOffset;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use flood_watch::config::AppConfig;
use flood_watch::db::{self, PgReadingStore};
use flood_watch::dispatch::{AlertDispatcher, MessagingChannel};
use flood_watch::queue::{
    AlertProducer, EnqueueOptions, KafkaBroker, KafkaPublisher, WorkerConfig, WorkerPool,
};
use flood_watch::scheduler::{IngestionCycle, RetentionCycle, Scheduler};
use flood_watch::telemetry::TelemetryClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!(run_mode = ?config.run_mode, "Starting Flood Watch Service...");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if config.run_mode.runs_scheduler() {
        handles.extend(start_scheduler(&config, shutdown_rx.clone()).await?);
    }
    if config.run_mode.runs_worker() {
        handles.push(start_worker(&config, shutdown_rx.clone())?);
    }

    wait_for_shutdown().await?;
    info!("Shutdown signal received, stopping...");

    shutdown_tx.send(true).ok();
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("Stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    Ok(())
}

async fn start_scheduler(
    config: &AppConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    // Init DB
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;
    info!("Connected to database");

    let store = Arc::new(PgReadingStore::new(pool));
    let publisher = Arc::new(KafkaPublisher::new(&config.kafka)?);
    let producer = AlertProducer::new(publisher, EnqueueOptions::from(&config.alert_queue));
    let source = Arc::new(TelemetryClient::new(&config.telemetry)?);

    let offset = FixedOffset::east_opt(config.telemetry.utc_offset_hours * 3600)
        .context("TELEMETRY_UTC_OFFSET_HOURS is out of range")?;

    let ingestion = IngestionCycle::new(
        source,
        store.clone(),
        producer,
        config.classifier_margin,
        offset,
    );
    let retention = RetentionCycle::new(store, config.retention_keep_latest, &config.upload_dir);

    Ok(Scheduler::new(
        ingestion,
        config.ingestion_interval,
        retention,
        config.retention_interval,
    )
    .spawn(shutdown))
}

fn start_worker(config: &AppConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<()>> {
    let queue = config.alert_queue.queue_name.as_str();
    let broker = Arc::new(KafkaBroker::new(&config.kafka, &[queue])?);

    let channel = MessagingChannel::from_config(&config.channel)?;
    info!(channel = channel.name(), queue, "Alert dispatcher ready");
    let dispatcher = Arc::new(AlertDispatcher::new(Arc::new(channel)));

    let pool = WorkerPool::new(
        broker,
        dispatcher,
        WorkerConfig::new(&config.alert_queue, &config.kafka),
    );
    Ok(tokio::spawn(pool.run(shutdown)))
}
