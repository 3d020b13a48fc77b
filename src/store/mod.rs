//! Metadata persistence: the transaction row, processing log, and report.
//!
//! The metadata store is the only read-write database. Its single
//! serialisation point is [`MetadataStore::claim`]: a conditional UPDATE that
//! moves `RECEIVED | ERROR → PROCESSING` and affects either one row (this
//! worker owns the transaction now) or zero rows (another worker holds it or
//! it is already terminal — a benign no-op under at-least-once delivery).
//!
//! Expected tables (migrations live with the deployment, not in this crate):
//!
//! ```sql
//! invoice_transaction (
//!     transaction_id uuid PRIMARY KEY, received_at timestamptz NOT NULL,
//!     source text NOT NULL, raw_blob_uri text NOT NULL,
//!     processed_xml_uri text, content_hash text,
//!     status text NOT NULL, validation_level text NOT NULL,
//!     invoice_number text, seller_vat_id text, issue_date date,
//!     payable_amount numeric(18,2), currency text,
//!     duplicate boolean NOT NULL DEFAULT false,
//!     retry_count integer NOT NULL DEFAULT 0, next_attempt_at timestamptz)
//! processing_log (transaction_id, stage, outcome, duration_ms, message, logged_at)
//! validation_report (transaction_id PRIMARY KEY, report jsonb, written_at)
//! ```

pub mod blob;
pub mod mem;

pub use blob::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use mem::MemoryMetadataStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::canonical::CanonicalInvoice;
use crate::report::ValidationReport;

/// Transient metadata-store failure.
#[derive(Debug, Clone, Error)]
#[error("metadata store error: {0}")]
pub struct StoreError(pub String);

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self(e.to_string())
    }
}

/// Lifecycle of one incoming document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Received,
    Processing,
    Valid,
    Invalid,
    ManualReview,
    Error,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Received => "RECEIVED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Valid => "VALID",
            TransactionStatus::Invalid => "INVALID",
            TransactionStatus::ManualReview => "MANUAL_REVIEW",
            TransactionStatus::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RECEIVED" => Some(Self::Received),
            "PROCESSING" => Some(Self::Processing),
            "VALID" => Some(Self::Valid),
            "INVALID" => Some(Self::Invalid),
            "MANUAL_REVIEW" => Some(Self::ManualReview),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// VALID, INVALID and MANUAL_REVIEW are absorbing; only ERROR may be
    /// re-entered through an operator-initiated retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Valid | Self::Invalid | Self::ManualReview | Self::Error
        )
    }
}

/// Highest validation stage a transaction has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationLevel {
    None,
    Structure,
    Semantic,
    Calculation,
    Business,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::None => "NONE",
            ValidationLevel::Structure => "STRUCTURE",
            ValidationLevel::Semantic => "SEMANTIC",
            ValidationLevel::Calculation => "CALCULATION",
            ValidationLevel::Business => "BUSINESS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "STRUCTURE" => Some(Self::Structure),
            "SEMANTIC" => Some(Self::Semantic),
            "CALCULATION" => Some(Self::Calculation),
            "BUSINESS" => Some(Self::Business),
            _ => None,
        }
    }
}

/// Where the document entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Api,
    Email,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Api => "api",
            Source::Email => "email",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "api" => Some(Self::Api),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// One transaction row.
#[derive(Debug, Clone)]
pub struct InvoiceTransaction {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub source: Source,
    pub raw_blob_uri: String,
    pub processed_xml_uri: Option<String>,
    pub content_hash: Option<String>,
    pub status: TransactionStatus,
    pub validation_level: ValidationLevel,
    pub invoice_number: Option<String>,
    pub seller_vat_id: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub payable_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub duplicate: bool,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl InvoiceTransaction {
    /// A freshly received transaction for the given raw blob.
    pub fn received(id: Uuid, source: Source, raw_blob_uri: impl Into<String>) -> Self {
        Self {
            id,
            received_at: Utc::now(),
            source,
            raw_blob_uri: raw_blob_uri.into(),
            processed_xml_uri: None,
            content_hash: None,
            status: TransactionStatus::Received,
            validation_level: ValidationLevel::None,
            invoice_number: None,
            seller_vat_id: None,
            issue_date: None,
            payable_amount: None,
            currency: None,
            duplicate: false,
            retry_count: 0,
            next_attempt_at: None,
        }
    }
}

/// Denormalised key fields copied onto the transaction row at completion.
#[derive(Debug, Clone, Default)]
pub struct KeyFields {
    pub invoice_number: Option<String>,
    pub seller_vat_id: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub payable_amount: Option<Decimal>,
    pub currency: Option<String>,
}

impl From<&CanonicalInvoice> for KeyFields {
    fn from(invoice: &CanonicalInvoice) -> Self {
        Self {
            invoice_number: Some(invoice.number.clone()),
            seller_vat_id: invoice.seller.vat_id.clone(),
            issue_date: Some(invoice.issue_date),
            payable_amount: Some(invoice.totals.payable),
            currency: Some(invoice.currency.clone()),
        }
    }
}

/// Everything written atomically with the terminal status transition.
#[derive(Debug, Clone)]
pub struct TerminalOutcome {
    pub status: TransactionStatus,
    pub validation_level: ValidationLevel,
    pub report: ValidationReport,
    pub key_fields: KeyFields,
    pub duplicate: bool,
}

/// Metadata store operations used by the task driver.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_received(&self, txn: &InvoiceTransaction) -> Result<(), StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<InvoiceTransaction>, StoreError>;

    /// The claim protocol: `RECEIVED | ERROR → PROCESSING`, conditionally.
    /// Returns whether this caller won the row.
    async fn claim(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Record the processed-XML location and content hash mid-run.
    async fn record_extraction(
        &self,
        id: Uuid,
        processed_xml_uri: &str,
        content_hash: &str,
    ) -> Result<(), StoreError>;

    /// Terminal transition plus report plus denormalised fields, atomically.
    async fn finish(&self, id: Uuid, outcome: &TerminalOutcome) -> Result<(), StoreError>;

    /// Transient failure: back to RECEIVED with the retry counter bumped and
    /// the next attempt scheduled.
    async fn release_for_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Retries exhausted (or an unrecoverable fault): terminal ERROR.
    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Append one processing-log row.
    async fn log_stage(
        &self,
        id: Uuid,
        stage: &str,
        outcome: &str,
        duration_ms: i64,
        message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// The persisted report, if any.
    async fn report(&self, id: Uuid) -> Result<Option<ValidationReport>, StoreError>;
}

/// Postgres implementation.
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn insert_received(&self, txn: &InvoiceTransaction) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO invoice_transaction
                 (transaction_id, received_at, source, raw_blob_uri, status,
                  validation_level, duplicate, retry_count)
             VALUES ($1, $2, $3, $4, $5, $6, false, 0)",
        )
        .bind(txn.id)
        .bind(txn.received_at)
        .bind(txn.source.as_str())
        .bind(&txn.raw_blob_uri)
        .bind(txn.status.as_str())
        .bind(txn.validation_level.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<InvoiceTransaction>, StoreError> {
        let row = sqlx::query(
            "SELECT transaction_id, received_at, source, raw_blob_uri,
                    processed_xml_uri, content_hash, status, validation_level,
                    invoice_number, seller_vat_id, issue_date, payable_amount,
                    currency, duplicate, retry_count, next_attempt_at
             FROM invoice_transaction WHERE transaction_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let status: String = row.try_get("status")?;
        let level: String = row.try_get("validation_level")?;
        let source: String = row.try_get("source")?;
        Ok(Some(InvoiceTransaction {
            id: row.try_get("transaction_id")?,
            received_at: row.try_get("received_at")?,
            source: Source::from_str(&source)
                .ok_or_else(|| StoreError(format!("unknown source '{source}'")))?,
            raw_blob_uri: row.try_get("raw_blob_uri")?,
            processed_xml_uri: row.try_get("processed_xml_uri")?,
            content_hash: row.try_get("content_hash")?,
            status: TransactionStatus::from_str(&status)
                .ok_or_else(|| StoreError(format!("unknown status '{status}'")))?,
            validation_level: ValidationLevel::from_str(&level)
                .ok_or_else(|| StoreError(format!("unknown validation level '{level}'")))?,
            invoice_number: row.try_get("invoice_number")?,
            seller_vat_id: row.try_get("seller_vat_id")?,
            issue_date: row.try_get("issue_date")?,
            payable_amount: row.try_get("payable_amount")?,
            currency: row.try_get("currency")?,
            duplicate: row.try_get("duplicate")?,
            retry_count: row.try_get("retry_count")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
        }))
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE invoice_transaction
             SET status = 'PROCESSING', next_attempt_at = NULL
             WHERE transaction_id = $1 AND status IN ('RECEIVED', 'ERROR')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_extraction(
        &self,
        id: Uuid,
        processed_xml_uri: &str,
        content_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE invoice_transaction
             SET processed_xml_uri = $2, content_hash = $3
             WHERE transaction_id = $1",
        )
        .bind(id)
        .bind(processed_xml_uri)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(&self, id: Uuid, outcome: &TerminalOutcome) -> Result<(), StoreError> {
        let report_json = serde_json::to_value(&outcome.report)
            .map_err(|e| StoreError(format!("report serialisation: {e}")))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE invoice_transaction
             SET status = $2, validation_level = $3, invoice_number = $4,
                 seller_vat_id = $5, issue_date = $6, payable_amount = $7,
                 currency = $8, duplicate = $9
             WHERE transaction_id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(outcome.validation_level.as_str())
        .bind(&outcome.key_fields.invoice_number)
        .bind(&outcome.key_fields.seller_vat_id)
        .bind(outcome.key_fields.issue_date)
        .bind(outcome.key_fields.payable_amount)
        .bind(&outcome.key_fields.currency)
        .bind(outcome.duplicate)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO validation_report (transaction_id, report, written_at)
             VALUES ($1, $2, now())
             ON CONFLICT (transaction_id)
             DO UPDATE SET report = EXCLUDED.report, written_at = EXCLUDED.written_at",
        )
        .bind(id)
        .bind(report_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn release_for_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE invoice_transaction
             SET status = 'RECEIVED', retry_count = retry_count + 1,
                 next_attempt_at = $2
             WHERE transaction_id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE invoice_transaction
             SET status = 'ERROR', retry_count = retry_count + 1
             WHERE transaction_id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            "INSERT INTO processing_log
                 (transaction_id, stage, outcome, duration_ms, message, logged_at)
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(id)
        .bind(stage)
        .bind(outcome)
        .bind(duration_ms)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn report(&self, id: Uuid) -> Result<Option<ValidationReport>, StoreError> {
        let row = sqlx::query("SELECT report FROM validation_report WHERE transaction_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<ValidationReport, StoreError> {
            let value: serde_json::Value = row.try_get("report").map_err(StoreError::from)?;
            serde_json::from_value(value)
                .map_err(|e| StoreError(format!("report deserialisation: {e}")))
        })
        .transpose()
    }
}
