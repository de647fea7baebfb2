//! Error type for pipeline orchestration.

use spriteforge_core::ReasonCode;
use thiserror::Error;

/// Failures that abort a run (as opposed to reason codes, which drive it).
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Manifest failed INIT validation. Exit code 2.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A required external dependency is missing. Exit code 3.
    #[error("missing dependency ({code}): {message}")]
    MissingDependency {
        code: ReasonCode,
        message: String,
    },

    /// An existing run folder belongs to a different manifest.
    #[error("run folder {run_id} holds state for a different manifest (found {found}, expected {expected})")]
    ManifestMismatch {
        run_id: String,
        found: String,
        expected: String,
    },

    /// Core data-model or filesystem failure.
    #[error(transparent)]
    Core(#[from] spriteforge_core::CoreError),

    /// Audit failure that is not expressible as a reason code.
    #[error(transparent)]
    Audit(#[from] spriteforge_audit::AuditError),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for terminal errors, per the pipeline contract:
    /// 2 for configuration problems, 3 for missing dependencies, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidManifest(_) | Self::ManifestMismatch { .. } => 2,
            Self::MissingDependency { .. } => 3,
            _ => 1,
        }
    }
}
