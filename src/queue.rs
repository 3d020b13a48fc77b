//! Durable task queue contract.
//!
//! The queue carries opaque transaction ids plus a delivery count; payload
//! bytes never travel through it. Delivery is best-effort at-least-once —
//! the claim protocol in the metadata store is what makes replays safe, so a
//! queue implementation may over-deliver freely.
//!
//! [`PgTaskQueue`] makes the metadata database itself the durable queue: it
//! polls for transactions that are due (status RECEIVED and past their
//! scheduled retry time). [`InMemoryQueue`] backs the tests.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;
use uuid::Uuid;

/// One unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMessage {
    pub transaction_id: Uuid,
    pub delivery_count: u32,
}

/// Blocking receive; `None` means the queue is closed for good.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn recv(&self) -> Option<TaskMessage>;
}

/// Polls the metadata store for due transactions.
pub struct PgTaskQueue {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn recv(&self) -> Option<TaskMessage> {
        loop {
            let result = sqlx::query(
                "SELECT transaction_id, retry_count
                 FROM invoice_transaction
                 WHERE status = 'RECEIVED'
                   AND (next_attempt_at IS NULL OR next_attempt_at <= now())
                 ORDER BY next_attempt_at NULLS FIRST, received_at
                 LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(Some(row)) => {
                    let transaction_id: Uuid = match row.try_get("transaction_id") {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(error = %e, "queue row decode failed");
                            tokio::time::sleep(self.poll_interval).await;
                            continue;
                        }
                    };
                    let retry_count: i32 = row.try_get("retry_count").unwrap_or(0);
                    return Some(TaskMessage {
                        transaction_id,
                        delivery_count: retry_count as u32 + 1,
                    });
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    // The queue outlives database hiccups.
                    warn!(error = %e, "queue poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

/// Channel-backed queue for tests.
pub struct InMemoryQueue {
    rx: Mutex<mpsc::UnboundedReceiver<TaskMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> (mpsc::UnboundedSender<TaskMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn recv(&self) -> Option<TaskMessage> {
        self.rx.lock().await.recv().await
    }
}
