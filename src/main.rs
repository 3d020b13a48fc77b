//! Worker binary: wires configuration, stores, queue, and the worker pool.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eingang::config::Config;
use eingang::erp::PgErpAdapter;
use eingang::pipeline::{Pipeline, PipelineOptions, RetryPolicy};
use eingang::queue::PgTaskQueue;
use eingang::store::{FsBlobStore, PgMetadataStore};
use eingang::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("configuration")?;
    info!(
        concurrency = config.worker_concurrency,
        kosit = config.kosit_engine().is_some(),
        "starting eingang worker"
    );

    let metadata_pool = PgPoolOptions::new()
        .max_connections(config.worker_concurrency as u32 * 2)
        .connect(&config.metadata_dsn)
        .await
        .context("metadata database")?;
    // Separate pool with read-only credentials.
    let erp_pool = PgPoolOptions::new()
        .max_connections(config.worker_concurrency as u32)
        .connect(&config.erp_dsn)
        .await
        .context("erp database")?;

    let store = Arc::new(PgMetadataStore::new(metadata_pool.clone()));
    let blobs = Arc::new(FsBlobStore::new(config.blob_root.clone()));
    let erp = Arc::new(PgErpAdapter::new(erp_pool));
    let queue = Arc::new(PgTaskQueue::new(metadata_pool, config.queue_poll));

    let pipeline = Arc::new(Pipeline::new(
        store,
        blobs,
        erp,
        config.kosit_engine(),
        PipelineOptions {
            monetary_tolerance: config.monetary_tolerance,
            task_timeout: config.task_timeout,
            retry: RetryPolicy {
                base: config.retry_base,
                cap: config.retry_cap,
                max_attempts: config.retry_max_attempts,
                jitter: 0.25,
            },
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = tokio::spawn(worker::run_pool(
        pipeline,
        queue,
        config.worker_concurrency,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutdown signal received; draining workers");
    let _ = shutdown_tx.send(true);
    pool.await.context("worker pool join")?;

    Ok(())
}
