use std::sync::Arc;

use anyhow::Context;

use scrumai_ai::{InsightBackend, InsightProvider};
use scrumai_infra::dedup::RedisProcessedSet;
use scrumai_infra::event_bus::{RedisStreamsBroker, StreamTopology};
use scrumai_infra::{
    AnalysisConfig, AnalysisOrchestrator, AnalysisWorker, AppConfig, PostgresStore, WorkerSettings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scrumai_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let store = Arc::new(
        PostgresStore::connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?,
    );
    store.ensure_schema().await.context("failed to prepare schema")?;

    let broker = RedisStreamsBroker::connect(
        &config.broker.redis_url,
        StreamTopology {
            stream: config.broker.stream.clone(),
            group: config.broker.group.clone(),
            dead_letter_stream: config.broker.dead_letter_stream.clone(),
        },
    )
    .await
    .context("failed to connect to Redis")?;
    let consumer = broker
        .consumer(config.broker.consumer_name.clone())
        .await
        .context("failed to open consumer connection")?;

    let provider: Arc<dyn InsightProvider> = Arc::new(
        InsightBackend::from_settings(&config.ai).context("failed to build insight provider")?,
    );
    tracing::info!(provider = %provider.name(), "insight provider selected");

    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        store.clone(),
        store.clone(),
        store,
        provider,
        AnalysisConfig {
            lookback_days: config.lookback_days,
            insight_timeout: config.insight_timeout,
        },
    ));

    let mut worker = AnalysisWorker::new(
        consumer,
        orchestrator,
        WorkerSettings {
            name: config.broker.consumer_name.clone(),
            max_deliveries: config.max_deliveries,
            poll_interval: config.poll_interval,
        },
    );

    if let Some(ttl) = config.dedup_ttl {
        let dedup = RedisProcessedSet::connect(
            &config.broker.redis_url,
            format!("{}:processed", config.broker.stream),
            ttl,
        )
        .await
        .context("failed to connect dedup set")?;
        worker = worker.with_dedup(Arc::new(dedup));
        tracing::info!(ttl_secs = ttl.as_secs(), "redelivery dedup enabled");
    }

    tracing::info!(
        worker = %config.broker.consumer_name,
        stream = %config.broker.stream,
        group = %config.broker.group,
        "starting analysis worker"
    );
    let handle = worker.spawn();

    shutdown_signal().await;
    tracing::info!("shutdown requested, waiting for in-flight message");

    let stats = handle
        .shutdown()
        .await
        .context("analysis worker task failed")?;
    tracing::info!(?stats, "analysis worker exited");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
