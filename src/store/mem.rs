//! In-memory metadata store with the same transition semantics as the
//! Postgres implementation. Used by tests and local development; the mutex
//! plays the role of the database's row-level atomicity, which makes the
//! claim protocol exercisable without a running Postgres.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    InvoiceTransaction, KeyFields, MetadataStore, StoreError, TerminalOutcome, TransactionStatus,
};
use crate::report::ValidationReport;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub stage: String,
    pub outcome: String,
    pub duration_ms: i64,
    pub message: Option<String>,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    rows: Mutex<HashMap<Uuid, InvoiceTransaction>>,
    reports: Mutex<HashMap<Uuid, ValidationReport>>,
    logs: Mutex<HashMap<Uuid, Vec<LogEntry>>>,
    finish_calls: AtomicUsize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often `finish` ran — the report must be written exactly once per
    /// successful run.
    pub fn finish_count(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    pub fn stage_log(&self, id: Uuid) -> Vec<LogEntry> {
        self.logs.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_received(&self, txn: &InvoiceTransaction) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&txn.id) {
            return Err(StoreError(format!("duplicate transaction id {}", txn.id)));
        }
        rows.insert(txn.id, txn.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<InvoiceTransaction>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row)
                if matches!(
                    row.status,
                    TransactionStatus::Received | TransactionStatus::Error
                ) =>
            {
                row.status = TransactionStatus::Processing;
                row.next_attempt_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_extraction(
        &self,
        id: Uuid,
        processed_xml_uri: &str,
        content_hash: &str,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            row.processed_xml_uri = Some(processed_xml_uri.to_string());
            row.content_hash = Some(content_hash.to_string());
        }
        Ok(())
    }

    async fn finish(&self, id: Uuid, outcome: &TerminalOutcome) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Err(StoreError(format!("no transaction {id}")));
        };
        if row.status != TransactionStatus::Processing {
            return Ok(());
        }
        row.status = outcome.status;
        row.validation_level = outcome.validation_level;
        row.duplicate = outcome.duplicate;
        let KeyFields {
            invoice_number,
            seller_vat_id,
            issue_date,
            payable_amount,
            currency,
        } = outcome.key_fields.clone();
        row.invoice_number = invoice_number;
        row.seller_vat_id = seller_vat_id;
        row.issue_date = issue_date;
        row.payable_amount = payable_amount;
        row.currency = currency;

        self.reports
            .lock()
            .unwrap()
            .insert(id, outcome.report.clone());
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release_for_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.status == TransactionStatus::Processing {
                row.status = TransactionStatus::Received;
                row.retry_count += 1;
                row.next_attempt_at = Some(next_attempt_at);
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.status == TransactionStatus::Processing {
                row.status = TransactionStatus::Error;
                row.retry_count += 1;
            }
        }
        Ok(())
    }

    async fn log_stage(
        &self,
        id: Uuid,
        stage: &str,
        outcome: &str,
        duration_ms: i64,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        self.logs.lock().unwrap().entry(id).or_default().push(LogEntry {
            stage: stage.to_string(),
            outcome: outcome.to_string(),
            duration_ms,
            message: message.map(str::to_string),
        });
        Ok(())
    }

    async fn report(&self, id: Uuid) -> Result<Option<ValidationReport>, StoreError> {
        Ok(self.reports.lock().unwrap().get(&id).cloned())
    }
}
