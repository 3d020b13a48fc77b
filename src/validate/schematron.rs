//! Semantic validation through the KoSIT validator, run as a subprocess.
//!
//! The engine is an opaque Java executable. Per invocation the worker writes
//! the XML into a scoped scratch directory, spawns the process with a bounded
//! timeout, and parses the SVRL report it leaves in the output directory.
//! The child is killed on timeout and the scratch directory is removed on
//! every exit path (the `TempDir` guard handles cancellation too).
//!
//! An unconfigured or missing engine degrades the stage to SKIPPED — the
//! pipeline continues without semantic findings.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::report::{Finding, Severity, Stage, ValidationStep, codes};
use crate::xml::{self, ns};

/// Location of the KoSIT validator and its configuration.
#[derive(Debug, Clone)]
pub struct KositEngine {
    /// Path to `validationtool-*-standalone.jar`.
    pub jar: PathBuf,
    /// `--scenarios` configuration file.
    pub scenarios: PathBuf,
    /// `--repository` directory.
    pub repository: PathBuf,
    pub timeout: Duration,
}

/// Run the Schematron stage.
///
/// Returns the step; only genuinely transient faults (spawn failure other
/// than a missing binary, missing report despite a completed run) surface as
/// errors for the retry policy.
pub async fn run(engine: Option<&KositEngine>, xml_bytes: &[u8]) -> Result<ValidationStep, PipelineError> {
    let Some(engine) = engine else {
        return Ok(ValidationStep::skipped_with(
            Stage::Semantic,
            Finding::info(
                codes::SEMANTIC_UNAVAILABLE,
                "Schematron engine is not configured; semantic validation skipped",
            ),
        ));
    };

    if !engine.jar.is_file() {
        return Ok(ValidationStep::skipped_with(
            Stage::Semantic,
            Finding::info(
                codes::SEMANTIC_UNAVAILABLE,
                format!("Schematron engine not found at {}", engine.jar.display()),
            ),
        ));
    }

    let scratch = tempfile::TempDir::new()
        .map_err(|e| PipelineError::Subprocess(format!("scratch dir: {e}")))?;
    let input = scratch.path().join("invoice.xml");
    let output = scratch.path().join("out");
    tokio::fs::write(&input, xml_bytes)
        .await
        .map_err(|e| PipelineError::Subprocess(format!("write input: {e}")))?;
    tokio::fs::create_dir(&output)
        .await
        .map_err(|e| PipelineError::Subprocess(format!("create output dir: {e}")))?;

    let mut command = Command::new("java");
    command
        .arg("-jar")
        .arg(&engine.jar)
        .arg("--scenarios")
        .arg(&engine.scenarios)
        .arg("--repository")
        .arg(&engine.repository)
        .arg("--output")
        .arg(&output)
        .arg(&input)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ValidationStep::skipped_with(
                Stage::Semantic,
                Finding::info(
                    codes::SEMANTIC_UNAVAILABLE,
                    "java runtime not available; semantic validation skipped",
                ),
            ));
        }
        Err(e) => return Err(PipelineError::Subprocess(format!("spawn: {e}"))),
    };

    let status = match tokio::time::timeout(engine.timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => out.status,
        Ok(Err(e)) => return Err(PipelineError::Subprocess(format!("wait: {e}"))),
        Err(_) => {
            // kill_on_drop reaps the child.
            warn!(timeout = ?engine.timeout, "schematron engine timed out");
            return Ok(ValidationStep::skipped_with(
                Stage::Semantic,
                Finding::info(
                    codes::SEMANTIC_UNAVAILABLE,
                    format!("Schematron engine timed out after {:?}", engine.timeout),
                ),
            ));
        }
    };
    debug!(code = ?status.code(), "schematron engine finished");

    // The exit code only says whether the run completed, not whether the
    // document passed; findings always come from the SVRL report.
    let report_path = find_report(&output).await?;
    let svrl = tokio::fs::read_to_string(&report_path)
        .await
        .map_err(|e| PipelineError::Subprocess(format!("read report: {e}")))?;
    let findings = parse_svrl(&svrl)?;

    Ok(ValidationStep::from_findings(Stage::Semantic, findings))
}

async fn find_report(output: &std::path::Path) -> Result<PathBuf, PipelineError> {
    let mut entries = tokio::fs::read_dir(output)
        .await
        .map_err(|e| PipelineError::Subprocess(format!("read output dir: {e}")))?;
    let mut fallback = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::Subprocess(format!("read output dir: {e}")))?
    {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with("-report.xml") {
            return Ok(path);
        }
        if name.ends_with(".xml") {
            fallback = Some(path);
        }
    }
    fallback.ok_or_else(|| {
        PipelineError::Subprocess("engine completed but produced no SVRL report".into())
    })
}

/// Parse an SVRL report into findings.
///
/// `failed-assert` becomes an ERROR or WARNING depending on its `flag`;
/// `successful-report` is always a WARNING. The Schematron rule id becomes
/// the finding code and the assertion's `location` XPath is preserved.
pub fn parse_svrl(svrl: &str) -> Result<Vec<Finding>, PipelineError> {
    let doc = xml::parse(svrl)
        .map_err(|e| PipelineError::Subprocess(format!("unparseable SVRL report: {e}")))?;

    let mut findings = Vec::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        if node.tag_name().namespace() != Some(ns::SVRL) {
            continue;
        }
        let (severity, default_severity) = match node.tag_name().name() {
            "failed-assert" => (flag_severity(node.attribute("flag")), Severity::Error),
            "successful-report" => (Some(Severity::Warning), Severity::Warning),
            _ => continue,
        };
        let severity = severity.unwrap_or(default_severity);

        let rule_id = node
            .attribute("id")
            .or_else(|| node.attribute("test"))
            .unwrap_or("RULE");
        let message = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "text")
            .and_then(|c| c.text())
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| "assertion failed".into());

        let mut finding = Finding::new(severity, codes::schematron(rule_id), message);
        if let Some(location) = node.attribute("location") {
            finding = finding.with_location(location);
        }
        findings.push(finding);
    }
    Ok(findings)
}

fn flag_severity(flag: Option<&str>) -> Option<Severity> {
    match flag {
        Some("fatal") => Some(Severity::Fatal),
        Some("warning") => Some(Severity::Warning),
        Some("information" | "info") => Some(Severity::Info),
        Some(_) => Some(Severity::Error),
        None => None,
    }
}
