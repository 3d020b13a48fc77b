//! The task driver: end-to-end orchestration of one transaction.
//!
//! ```text
//! RECEIVED ──claim──► PROCESSING ──run stages──► {VALID | INVALID | MANUAL_REVIEW | ERROR}
//!                       │
//!                       └──transient failure──► RECEIVED (retry counter +1)
//! ```
//!
//! The claim is a conditional UPDATE and the only defence against
//! at-least-once delivery; everything after it is safe to crash out of.
//! Stages run strictly sequentially. Permanent faults become FATAL findings
//! and terminate with a status derived from the report; transient faults
//! re-schedule the transaction with capped exponential backoff until the
//! attempt budget is spent, after which the status is ERROR.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::erp::ErpAdapter;
use crate::error::PipelineError;
use crate::extract::{self, RoutedDocument};
use crate::mapper;
use crate::queue::TaskMessage;
use crate::report::{
    Finding, Stage, StepOutcome, ValidationReport, ValidationStep, codes,
};
use crate::store::{
    BlobError, BlobStore, InvoiceTransaction, KeyFields, MetadataStore, TerminalOutcome,
    TransactionStatus, ValidationLevel,
};
use crate::validate::schematron::KositEngine;
use crate::validate::{arithmetic, business, schematron, structure};
use crate::xml;

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    /// Relative jitter, e.g. 0.25 for ±25 %.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            cap: Duration::from_secs(600),
            max_attempts: 5,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based: the delay after the first
    /// failure is the base).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base.as_secs_f64() * f64::from(2u32.pow(exponent));
        let capped = scaled.min(self.cap.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(1.0))
    }
}

/// Driver tunables.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub monetary_tolerance: Decimal,
    pub task_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            monetary_tolerance: dec!(0.02),
            task_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }
}

/// The per-worker pipeline instance. Shared read-only across workers.
pub struct Pipeline {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    erp: Arc<dyn ErpAdapter>,
    kosit: Option<KositEngine>,
    options: PipelineOptions,
}

/// What one completed run decided.
struct RunOutcome {
    status: TransactionStatus,
    validation_level: ValidationLevel,
    report: ValidationReport,
    key_fields: KeyFields,
    duplicate: bool,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        erp: Arc<dyn ErpAdapter>,
        kosit: Option<KositEngine>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            blobs,
            erp,
            kosit,
            options,
        }
    }

    /// Handle one queue delivery. Safe to replay: a transaction that is
    /// terminal or already claimed is a no-op.
    pub async fn handle(&self, message: TaskMessage) -> Result<(), PipelineError> {
        let id = message.transaction_id;
        let Some(txn) = self
            .store
            .fetch(id)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?
        else {
            warn!(%id, "delivery for unknown transaction; dropping");
            return Ok(());
        };

        if !self
            .store
            .claim(id)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?
        {
            debug!(%id, status = txn.status.as_str(), "claim lost; nothing to do");
            return Ok(());
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(self.options.task_timeout, self.run(&txn)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TaskTimeout(self.options.task_timeout)),
        };

        match result {
            Ok(outcome) => {
                info!(
                    %id,
                    status = outcome.status.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "transaction finished"
                );
                self.store
                    .finish(
                        id,
                        &TerminalOutcome {
                            status: outcome.status,
                            validation_level: outcome.validation_level,
                            report: outcome.report,
                            key_fields: outcome.key_fields,
                            duplicate: outcome.duplicate,
                        },
                    )
                    .await
                    .map_err(|e| PipelineError::Storage(e.to_string()))?;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                let attempt = txn.retry_count as u32 + 1;
                if attempt >= self.options.retry.max_attempts {
                    error!(%id, attempt, error = %e, "retries exhausted; terminal ERROR");
                    self.store
                        .mark_failed(id)
                        .await
                        .map_err(|e| PipelineError::Storage(e.to_string()))?;
                } else {
                    let delay = self.options.retry.delay(attempt);
                    warn!(%id, attempt, retry_in = ?delay, error = %e, "transient failure; rescheduling");
                    let next = chrono::Utc::now()
                        + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    self.store
                        .release_for_retry(id, next)
                        .await
                        .map_err(|e| PipelineError::Storage(e.to_string()))?;
                }
                Err(e)
            }
            Err(e) => {
                // A permanent fault that produced no findings (e.g. the raw
                // blob vanished): nothing a replay could fix, no report to
                // write.
                error!(%id, error = %e, "unrecoverable failure; terminal ERROR");
                self.store
                    .mark_failed(id)
                    .await
                    .map_err(|e| PipelineError::Storage(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Run the stages. `Err` is reserved for faults the retry policy should
    /// see; every permanent fault is converted into findings here.
    async fn run(&self, txn: &InvoiceTransaction) -> Result<RunOutcome, PipelineError> {
        let mut report = ValidationReport::new();
        let mut level = ValidationLevel::None;

        // --- Stage 1: extraction -------------------------------------------
        let stage_started = Instant::now();
        let raw = match self.blobs.get(&txn.raw_blob_uri).await {
            Ok(raw) => raw,
            Err(BlobError::NotFound(uri)) => return Err(PipelineError::BlobNotFound(uri)),
            Err(BlobError::Transient(e)) => return Err(PipelineError::Storage(e)),
        };
        let content_hash = hex_digest(&raw);

        let routed = match extract::route(&raw, None) {
            Ok(routed) => routed,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                // Unusable input: FATAL finding, terminal INVALID.
                let step = ValidationStep::from_findings(
                    Stage::Extraction,
                    vec![extraction_finding(&e)],
                );
                self.log_step(txn, &step, stage_started).await?;
                report.push_step(step);
                report.skip_remaining(Stage::Extraction);
                return Ok(RunOutcome {
                    status: TransactionStatus::Invalid,
                    validation_level: level,
                    report,
                    key_fields: KeyFields::default(),
                    duplicate: false,
                });
            }
        };

        let (declared, syntax, xml_bytes) = match routed {
            RoutedDocument::OpaquePdf => {
                // A valid PDF without invoice XML is a human's problem, not
                // an error.
                let step = ValidationStep::from_findings(
                    Stage::Extraction,
                    vec![Finding::warning(
                        codes::PDF_NO_XML,
                        "PDF carries no embedded invoice XML; routing to manual review",
                    )],
                );
                self.log_step(txn, &step, stage_started).await?;
                report.push_step(step);
                report.skip_remaining(Stage::Extraction);
                return Ok(RunOutcome {
                    status: TransactionStatus::ManualReview,
                    validation_level: level,
                    report,
                    key_fields: KeyFields::default(),
                    duplicate: false,
                });
            }
            RoutedDocument::Xml {
                declared,
                syntax,
                xml,
                ..
            } => (declared, syntax, xml),
        };

        // Archive the normalised XML before validating anything — kept for
        // forensics even when the document is later rejected.
        let processed_uri = format!("processed/{}.xml", txn.id);
        self.blobs
            .put(&processed_uri, &xml_bytes)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        self.store
            .record_extraction(txn.id, &processed_uri, &content_hash)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let step = ValidationStep::from_findings(Stage::Extraction, Vec::new());
        self.log_step(txn, &step, stage_started).await?;
        report.push_step(step);

        // --- Stage 2: mapping ----------------------------------------------
        let stage_started = Instant::now();
        let text = xml::decode(&xml_bytes)?;
        let doc = xml::parse(text)?;

        let mapped = mapper::map_document(&doc, syntax, declared);
        let step = ValidationStep::from_findings(Stage::Mapping, mapped.findings);
        let mapping_fatal = step.outcome == StepOutcome::Fatal;
        self.log_step(txn, &step, stage_started).await?;
        report.push_step(step);

        let Some(invoice) = mapped.invoice else {
            debug_assert!(mapping_fatal);
            report.skip_remaining(Stage::Mapping);
            return Ok(RunOutcome {
                status: TransactionStatus::Invalid,
                validation_level: level,
                report,
                key_fields: KeyFields::default(),
                duplicate: false,
            });
        };
        let key_fields = KeyFields::from(&invoice);

        // --- Stage 3: structure --------------------------------------------
        let stage_started = Instant::now();
        let step = structure::validate_structure(&doc, syntax);
        let structure_fatal = step.outcome == StepOutcome::Fatal;
        self.log_step(txn, &step, stage_started).await?;
        report.push_step(step);
        level = ValidationLevel::Structure;
        if structure_fatal {
            report.skip_remaining(Stage::Structure);
            return Ok(RunOutcome {
                status: TransactionStatus::Invalid,
                validation_level: level,
                report,
                key_fields,
                duplicate: false,
            });
        }

        // --- Stage 4: semantic (Schematron) --------------------------------
        let stage_started = Instant::now();
        let step = schematron::run(self.kosit.as_ref(), &xml_bytes).await?;
        let semantic_ran = step.outcome != StepOutcome::Skipped;
        let semantic_fatal = step.outcome == StepOutcome::Fatal;
        self.log_step(txn, &step, stage_started).await?;
        report.push_step(step);
        if semantic_ran {
            level = ValidationLevel::Semantic;
        }
        if semantic_fatal {
            report.skip_remaining(Stage::Semantic);
            return Ok(RunOutcome {
                status: TransactionStatus::Invalid,
                validation_level: level,
                report,
                key_fields,
                duplicate: false,
            });
        }

        // --- Stage 5: arithmetic -------------------------------------------
        // Errors here do not halt the pipeline; the business stage still runs.
        let stage_started = Instant::now();
        let step = arithmetic::validate_arithmetic(&invoice, self.options.monetary_tolerance);
        self.log_step(txn, &step, stage_started).await?;
        report.push_step(step);
        level = ValidationLevel::Calculation;

        // --- Stage 6: business ---------------------------------------------
        let stage_started = Instant::now();
        let step = business::validate_business(
            self.erp.as_ref(),
            &invoice,
            self.options.monetary_tolerance,
        )
        .await
        .map_err(|e| PipelineError::Erp(e.to_string()))?;
        self.log_step(txn, &step, stage_started).await?;
        report.push_step(step);
        level = ValidationLevel::Business;

        let duplicate = report.has_code(codes::ERP_DUPLICATE);
        let status = if report.has_fatal() {
            TransactionStatus::Invalid
        } else if report.has_error() {
            TransactionStatus::ManualReview
        } else {
            TransactionStatus::Valid
        };

        Ok(RunOutcome {
            status,
            validation_level: level,
            report,
            key_fields,
            duplicate,
        })
    }

    async fn log_step(
        &self,
        txn: &InvoiceTransaction,
        step: &ValidationStep,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let outcome = match step.outcome {
            StepOutcome::Success => "SUCCESS",
            StepOutcome::Warnings => "WARNINGS",
            StepOutcome::Errors => "ERRORS",
            StepOutcome::Fatal => "FATAL",
            StepOutcome::Skipped => "SKIPPED",
        };
        let message = step.findings.first().map(|f| f.message.as_str());
        self.store
            .log_stage(
                txn.id,
                step.stage.as_str(),
                outcome,
                started.elapsed().as_millis() as i64,
                message,
            )
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }
}

fn extraction_finding(e: &PipelineError) -> Finding {
    match e {
        PipelineError::UnsupportedCarrier(msg) => {
            Finding::fatal(codes::CARRIER_UNSUPPORTED, msg.clone())
        }
        PipelineError::UnknownFormat(msg) => Finding::fatal(codes::FORMAT_UNKNOWN, msg.clone()),
        PipelineError::PdfMalformed(msg) => Finding::fatal(codes::PDF_MALFORMED, msg.clone()),
        PipelineError::Xml(msg) => Finding::fatal(codes::FORMAT_UNKNOWN, msg.clone()),
        other => Finding::fatal(codes::CARRIER_UNSUPPORTED, other.to_string()),
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_growth_and_cap() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let first = policy.delay(1).as_secs_f64();
            assert!((45.0..=75.0).contains(&first), "attempt 1: {first}");

            let second = policy.delay(2).as_secs_f64();
            assert!((90.0..=150.0).contains(&second), "attempt 2: {second}");

            // Attempt 5 would be 960 s uncapped; the cap plus jitter bounds it.
            let fifth = policy.delay(5).as_secs_f64();
            assert!((450.0..=750.0).contains(&fifth), "attempt 5: {fifth}");
        }
    }

    #[test]
    fn sha256_digest_is_hex() {
        let digest = hex_digest(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
