//! JSONL audit log.
//!
//! Every externally visible decision in a run lands here as one JSON line:
//! generation started, audit verdicts, retry decisions, stop conditions,
//! export gates. The schema is validated by [`validate_log_line`] so tests
//! and downstream tooling can hold the stream to a contract.
//!
//! Secrets (API credentials and anything else registered with the writer)
//! are replaced with a fixed token before a line touches disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::CoreError;
use crate::reason::ReasonCode;

/// Fixed replacement for redacted secrets.
pub const REDACTED_TOKEN: &str = "[REDACTED]";

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Outcome attached to gate/audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Pass,
    Fail,
    Skip,
    Error,
}

/// One audit-log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    // Required
    pub timestamp: String,
    pub run_id: String,
    pub level: EventLevel,
    pub event: String,

    // Optional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_codes: Option<Vec<ReasonCode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EventOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AuditEvent {
    /// New event with required fields only.
    #[must_use]
    pub fn new(run_id: impl Into<String>, level: EventLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: clock::now_utc(),
            run_id: run_id.into(),
            level,
            event: event.into(),
            frame: None,
            attempt: None,
            strategy: None,
            reason_codes: None,
            score: None,
            outcome: None,
            duration_ms: None,
            artifact_refs: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_frame(mut self, frame: u32) -> Self {
        self.frame = Some(frame);
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    #[must_use]
    pub fn with_codes(mut self, codes: &[ReasonCode]) -> Self {
        self.reason_codes = Some(codes.to_vec());
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: EventOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Serialize to one JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the audit-log schema.
pub fn validate_log_line(line: &str, line_number: usize) -> Result<(), Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<json>".to_string(),
                message: format!("invalid JSON: {e}"),
            });
            return Err(errors);
        }
    };
    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError {
            line_number,
            field: "<root>".to_string(),
            message: "expected JSON object".to_string(),
        });
        return Err(errors);
    };

    for field in ["timestamp", "run_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["debug", "info", "warn", "error"].contains(&level)
    {
        errors.push(LogValidationError {
            line_number,
            field: "level".to_string(),
            message: format!("invalid level: '{level}'"),
        });
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "skip", "error"].contains(&outcome)
    {
        errors.push(LogValidationError {
            line_number,
            field: "outcome".to_string(),
            message: format!("invalid outcome: '{outcome}'"),
        });
    }

    if let Some(score) = obj.get("score").and_then(serde_json::Value::as_f64)
        && !(0.0..=1.0).contains(&score)
    {
        errors.push(LogValidationError {
            line_number,
            field: "score".to_string(),
            message: format!("score {score} outside [0, 1]"),
        });
    }

    if let Some(codes) = obj.get("reason_codes").and_then(|v| v.as_array()) {
        for code in codes {
            let known = code
                .as_str()
                .is_some_and(|s| ReasonCode::parse(s).is_some());
            if !known {
                errors.push(LogValidationError {
                    line_number,
                    field: "reason_codes".to_string(),
                    message: format!("unknown reason code: {code}"),
                });
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate an entire JSONL file; returns (line_count, errors).
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), CoreError> {
    let content = std::fs::read_to_string(path)?;
    let mut line_count = 0;
    let mut all_errors = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }
    Ok((line_count, all_errors))
}

/// Replace every registered secret in `text` with [`REDACTED_TOKEN`].
#[must_use]
pub fn redact_secrets(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = out.replace(secret.as_str(), REDACTED_TOKEN);
        }
    }
    out
}

/// Append-only JSONL writer, shared between pipeline stages.
#[derive(Debug)]
pub struct AuditLogWriter {
    path: PathBuf,
    secrets: Vec<String>,
    file: Mutex<std::fs::File>,
}

impl AuditLogWriter {
    /// Open (or create) the log at `path`. `secrets` are redacted from every
    /// line before it is written.
    pub fn open(path: impl Into<PathBuf>, secrets: Vec<String>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            secrets,
            file: Mutex::new(file),
        })
    }

    /// Emit one event. The line is flushed before returning so a crash never
    /// loses an acknowledged decision.
    pub fn emit(&self, event: &AuditEvent) -> Result<(), CoreError> {
        let line = redact_secrets(&event.to_jsonl()?, &self.secrets);
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
