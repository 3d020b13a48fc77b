//! Validation report: findings, per-stage steps, and the aggregate outcome.
//!
//! A report is an ordered sequence of [`ValidationStep`]s, one per pipeline
//! stage, each carrying zero or more [`Finding`]s. Reports are append-only
//! within a single processing run and persisted exactly once, atomically with
//! the terminal status transition.

use serde::{Deserialize, Serialize};

/// Finding severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// Aggregate outcome of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Warnings,
    Errors,
    Fatal,
    Skipped,
}

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Extraction,
    Mapping,
    Structure,
    Semantic,
    Arithmetic,
    Business,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 6] = [
        Stage::Extraction,
        Stage::Mapping,
        Stage::Structure,
        Stage::Semantic,
        Stage::Arithmetic,
        Stage::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Mapping => "mapping",
            Stage::Structure => "structure",
            Stage::Semantic => "semantic",
            Stage::Arithmetic => "arithmetic",
            Stage::Business => "business",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed catalogue of finding codes.
///
/// No free-form text is ever elevated above these codes; the human message on
/// a finding is advisory. Schematron findings use `SCHEMATRON_<rule-id>`.
pub mod codes {
    pub const XSD_VIOLATION: &str = "XSD_VIOLATION";
    pub const MAP_FIELD_MISSING: &str = "MAP_FIELD_MISSING";
    pub const MAP_INVALID_VALUE: &str = "MAP_INVALID_VALUE";
    pub const MAP_SYNTAX_MISMATCH: &str = "MAP_SYNTAX_MISMATCH";
    pub const CALC_TOTAL_MISMATCH: &str = "CALC_TOTAL_MISMATCH";
    pub const CALC_TAX_MISMATCH: &str = "CALC_TAX_MISMATCH";
    pub const CALC_PAYABLE_MISMATCH: &str = "CALC_PAYABLE_MISMATCH";
    pub const ERP_VENDOR_UNKNOWN: &str = "ERP_VENDOR_UNKNOWN";
    pub const ERP_DUPLICATE: &str = "ERP_DUPLICATE";
    pub const ERP_BANK_MISMATCH: &str = "ERP_BANK_MISMATCH";
    pub const ERP_PO_UNKNOWN: &str = "ERP_PO_UNKNOWN";
    pub const ERP_PO_CLOSED: &str = "ERP_PO_CLOSED";
    pub const ERP_PO_OVERBILL: &str = "ERP_PO_OVERBILL";
    pub const ERP_PO_PARTIAL: &str = "ERP_PO_PARTIAL";
    pub const ERP_PO_NOT_REFERENCED: &str = "ERP_PO_NOT_REFERENCED";
    pub const ERP_LINE_UNKNOWN: &str = "ERP_LINE_UNKNOWN";
    pub const ERP_QTY_EXCEEDED: &str = "ERP_QTY_EXCEEDED";
    pub const ERP_LINE_UNIDENTIFIED: &str = "ERP_LINE_UNIDENTIFIED";
    pub const CARRIER_UNSUPPORTED: &str = "CARRIER_UNSUPPORTED";
    pub const FORMAT_UNKNOWN: &str = "FORMAT_UNKNOWN";
    pub const PDF_MALFORMED: &str = "PDF_MALFORMED";
    pub const PDF_NO_XML: &str = "PDF_NO_XML";
    pub const SEMANTIC_UNAVAILABLE: &str = "SEMANTIC_UNAVAILABLE";
    pub const STAGE_SKIPPED: &str = "STAGE_SKIPPED";

    /// Code for a Schematron rule finding, e.g. `SCHEMATRON_BR-DE-1`.
    pub fn schematron(rule_id: &str) -> String {
        format!("SCHEMATRON_{rule_id}")
    }
}

/// One observation made by a validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    /// Key from the closed catalogue in [`codes`].
    pub code: String,
    pub message: String,
    /// Element-path or XPath pointer into the source document, if any.
    pub location: Option<String>,
    /// Offending field name, if any.
    pub field: Option<String>,
    /// Offending field value, if any.
    pub value: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            location: None,
            field: None,
            value: None,
        }
    }

    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, code, message)
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self.value = Some(value.into());
        self
    }
}

/// Result of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStep {
    pub stage: Stage,
    pub outcome: StepOutcome,
    pub findings: Vec<Finding>,
}

impl ValidationStep {
    /// Build a step whose outcome is derived from the worst finding severity.
    pub fn from_findings(stage: Stage, findings: Vec<Finding>) -> Self {
        let outcome = match findings.iter().map(|f| f.severity).max() {
            Some(Severity::Fatal) => StepOutcome::Fatal,
            Some(Severity::Error) => StepOutcome::Errors,
            Some(Severity::Warning) => StepOutcome::Warnings,
            _ => StepOutcome::Success,
        };
        Self {
            stage,
            outcome,
            findings,
        }
    }

    /// A stage that did not run, linked to the stage that stopped the pipeline.
    pub fn skipped_after(stage: Stage, cause: Stage) -> Self {
        Self {
            stage,
            outcome: StepOutcome::Skipped,
            findings: vec![Finding::info(
                codes::STAGE_SKIPPED,
                format!("stage not executed: pipeline stopped in {cause} stage"),
            )],
        }
    }

    /// A stage that ran but could not do its work (e.g. engine unavailable).
    pub fn skipped_with(stage: Stage, finding: Finding) -> Self {
        Self {
            stage,
            outcome: StepOutcome::Skipped,
            findings: vec![finding],
        }
    }
}

/// The aggregate outcome of one processing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub steps: Vec<ValidationStep>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_step(&mut self, step: ValidationStep) {
        self.steps.push(step);
    }

    /// Mark every stage after `cause` as skipped.
    pub fn skip_remaining(&mut self, cause: Stage) {
        let after = Stage::ORDER
            .iter()
            .skip_while(|s| **s != cause)
            .skip(1)
            .copied();
        for stage in after {
            self.steps.push(ValidationStep::skipped_after(stage, cause));
        }
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.steps.iter().flat_map(|s| s.findings.iter())
    }

    pub fn has_fatal(&self) -> bool {
        self.findings().any(|f| f.severity == Severity::Fatal)
    }

    pub fn has_error(&self) -> bool {
        self.findings().any(|f| f.severity == Severity::Error)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.findings().any(|f| f.code == code)
    }

    pub fn step(&self, stage: Stage) -> Option<&ValidationStep> {
        self.steps.iter().find(|s| s.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_derived_from_worst_severity() {
        let step = ValidationStep::from_findings(Stage::Mapping, vec![]);
        assert_eq!(step.outcome, StepOutcome::Success);

        let step = ValidationStep::from_findings(
            Stage::Mapping,
            vec![
                Finding::info("X", "a"),
                Finding::error("Y", "b"),
                Finding::warning("Z", "c"),
            ],
        );
        assert_eq!(step.outcome, StepOutcome::Errors);

        let step = ValidationStep::from_findings(Stage::Mapping, vec![Finding::fatal("F", "boom")]);
        assert_eq!(step.outcome, StepOutcome::Fatal);
    }

    #[test]
    fn skip_remaining_appends_later_stages_only() {
        let mut report = ValidationReport::new();
        report.push_step(ValidationStep::from_findings(
            Stage::Mapping,
            vec![Finding::fatal(codes::MAP_FIELD_MISSING, "missing")],
        ));
        report.skip_remaining(Stage::Mapping);

        let stages: Vec<Stage> = report.steps.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Mapping,
                Stage::Structure,
                Stage::Semantic,
                Stage::Arithmetic,
                Stage::Business,
            ]
        );
        assert!(
            report
                .steps
                .iter()
                .skip(1)
                .all(|s| s.outcome == StepOutcome::Skipped)
        );
    }

    #[test]
    fn report_round_trips_through_json() {
        let mut report = ValidationReport::new();
        report.push_step(ValidationStep::from_findings(
            Stage::Arithmetic,
            vec![
                Finding::error(codes::CALC_TAX_MISMATCH, "tax off by 1.00")
                    .with_value("tax_amount", "19.00"),
            ],
        ));
        let json = serde_json::to_string(&report).unwrap();
        let back: ValidationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
    }
}
