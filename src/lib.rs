//! # eingang
//!
//! EN 16931 e-invoice intake and validation pipeline.
//!
//! Ingests electronic invoices in the European formats mandated by EN 16931 —
//! pure XML in the UBL 2.1 Invoice/CreditNote syntax, pure XML in the
//! UN/CEFACT Cross Industry Invoice (CII) syntax, and the hybrid PDF/A-3
//! carriers ZUGFeRD and Factur-X — and drives each document through a
//! multi-stage validation pipeline:
//!
//! 1. extraction (blob download, PDF attachment retrieval)
//! 2. format classification (root element + namespace)
//! 3. canonical mapping (CII and UBL normalised into one model)
//! 4. structural validation
//! 5. semantic validation (KoSIT Schematron engine as a subprocess)
//! 6. arithmetic validation (totals recomputed with decimal arithmetic)
//! 7. business validation (three-way match against a read-only ERP store)
//!
//! Every transaction ends in a terminal status (`VALID`, `INVALID`,
//! `MANUAL_REVIEW`, or `ERROR`) together with a structured
//! [`ValidationReport`](report::ValidationReport). Tasks arrive over a durable
//! queue with at-least-once semantics; a conditional-update claim protocol in
//! the metadata store makes replays harmless.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating point.
//! The canonical types follow the EN 16931 semantic model.

pub mod canonical;
pub mod config;
pub mod erp;
pub mod error;
pub mod extract;
pub mod mapper;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod store;
pub mod validate;
pub mod worker;
pub mod xml;

pub use crate::error::{MappingError, PipelineError};
