//! Worker pool: N parallel workers, each processing one transaction at a
//! time in a single logical flow. Stages within a transaction are sequenced,
//! never fanned out; concurrency exists only across transactions.
//!
//! Shutdown is cooperative: workers observe the signal between transactions
//! and at the queue suspension point, finish their in-flight task, and exit.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::pipeline::Pipeline;
use crate::queue::TaskQueue;

/// Run `concurrency` workers until shutdown is signalled or the queue closes.
pub async fn run_pool(
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn TaskQueue>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) {
    let workers: Vec<_> = (0..concurrency.max(1))
        .map(|index| {
            let pipeline = Arc::clone(&pipeline);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tokio::spawn(worker_loop(index, pipeline, queue, shutdown))
        })
        .collect();

    for (index, result) in join_all(workers).await.into_iter().enumerate() {
        if let Err(e) = result {
            warn!(worker = index, error = %e, "worker task panicked");
        }
    }
}

async fn worker_loop(
    index: usize,
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn TaskQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = index, "worker started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = queue.recv() => {
                let Some(message) = message else { break };
                // Errors were already classified and persisted by the driver;
                // here they are only worth a log line.
                if let Err(e) = pipeline.handle(message).await {
                    warn!(
                        worker = index,
                        transaction = %message.transaction_id,
                        error = %e,
                        "task failed"
                    );
                }
            }
        }
    }
    info!(worker = index, "worker stopped");
}
