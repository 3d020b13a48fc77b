//! Error taxonomy of the processing pipeline.
//!
//! Two families matter to the task driver:
//!
//! - **Transient** errors (I/O, database connectivity, subprocess spawn
//!   failure, timeouts) are retried with capped exponential backoff and end in
//!   terminal status `ERROR` once the retry budget is exhausted.
//! - **Permanent** errors (unparseable input, unrecognised XML root, missing
//!   mandatory fields) are converted into `FATAL` findings and end the
//!   transaction immediately — a byte-identical replay cannot succeed.

use std::time::Duration;

use thiserror::Error;

/// How a mapping failed: the field was absent, or present but unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    MissingField,
    InvalidValue,
}

/// A mandatory-field failure raised by the mappers and the XPath toolkit.
///
/// `field` is the slash-separated element path from below the document root,
/// e.g. `ExchangedDocument/IssueDateTime/DateTimeString`. Mapping errors are
/// permanent: the orchestrator turns them into `FATAL` findings.
#[derive(Debug, Clone, Error)]
#[error("{field}: {message}")]
pub struct MappingError {
    pub field: String,
    pub message: String,
    pub kind: MappingKind,
}

impl MappingError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: "mandatory field is missing or empty".into(),
            kind: MappingKind::MissingField,
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind: MappingKind::InvalidValue,
        }
    }
}

/// Top-level error for one processing run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Input is neither a PDF nor XML. Permanent.
    #[error("unsupported carrier: {0}")]
    UnsupportedCarrier(String),

    /// XML root element/namespace is none of the EN 16931 syntaxes. Permanent.
    #[error("unrecognised XML document: {0}")]
    UnknownFormat(String),

    /// The PDF is structurally broken (but complete). Permanent.
    #[error("malformed PDF: {0}")]
    PdfMalformed(String),

    /// The byte stream is truncated — a re-download may succeed. Transient.
    #[error("truncated input: {0}")]
    Truncated(String),

    /// The payload is not well-formed XML (or not UTF-8). Permanent.
    #[error("invalid XML: {0}")]
    Xml(String),

    /// Mandatory-field failure from a mapper. Permanent.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Raw blob is gone; nothing to retry against. Permanent.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Blob store or metadata store hiccup. Transient.
    #[error("storage error: {0}")]
    Storage(String),

    /// ERP query failure (connectivity, timeout). Transient.
    #[error("erp error: {0}")]
    Erp(String),

    /// Schematron engine failed to spawn or produced no report. Transient.
    #[error("subprocess error: {0}")]
    Subprocess(String),

    /// The per-transaction deadline elapsed. Transient.
    #[error("task timed out after {0:?}")]
    TaskTimeout(Duration),
}

impl PipelineError {
    /// Whether the retry policy should consume this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Truncated(_)
                | Self::Storage(_)
                | Self::Erp(_)
                | Self::Subprocess(_)
                | Self::TaskTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PipelineError::Storage("db gone".into()).is_transient());
        assert!(PipelineError::Erp("timeout".into()).is_transient());
        assert!(PipelineError::Truncated("pdf".into()).is_transient());
        assert!(!PipelineError::UnsupportedCarrier("text/plain".into()).is_transient());
        assert!(!PipelineError::Mapping(MappingError::missing("ID")).is_transient());
        assert!(!PipelineError::PdfMalformed("bad xref".into()).is_transient());
    }
}
