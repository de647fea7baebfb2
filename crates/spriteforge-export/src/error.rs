//! Error type for the export pipeline.

use spriteforge_core::ReasonCode;
use thiserror::Error;

/// Failures that abort the export stage. Validation findings are not
/// errors; they land in reports and drive the release gate.
#[derive(Error, Debug)]
pub enum ExportError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core data-model failure (atomic writes).
    #[error(transparent)]
    Core(#[from] spriteforge_core::CoreError),

    /// Image decode failure outside of a validation context.
    #[error(transparent)]
    Audit(#[from] spriteforge_audit::AuditError),

    /// The packer executable is missing. Exit code 3.
    #[error("missing dependency ({code}): {message}")]
    MissingDependency {
        code: ReasonCode,
        message: String,
    },

    /// The packer subprocess could not be spawned or crashed.
    #[error("packer invocation failed: {0}")]
    PackerSpawn(String),

    /// Export was asked to run without any approved frames.
    #[error("nothing to export: {0}")]
    NothingToExport(String),
}

impl ExportError {
    /// Process exit code for errors that abort the export stage: 3 for
    /// missing dependencies, 1 otherwise. (Gate verdicts exit through
    /// [`crate::release::ExportReport::exit_code`] instead.)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingDependency { .. } => 3,
            _ => 1,
        }
    }
}
