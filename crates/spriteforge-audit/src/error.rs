//! Error type for the audit crate.

use spriteforge_core::ReasonCode;
use thiserror::Error;

/// Failures raised while normalizing or auditing a frame.
#[derive(Error, Debug)]
pub enum AuditError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Normalization rejected the candidate for a reason that maps to a
    /// hard gate code. The auditor converts this into a HardFail report
    /// instead of propagating.
    #[error("normalization failed ({code}): {message}")]
    Normalize {
        code: ReasonCode,
        message: String,
    },

    /// Core data-model error (atomic IO, state).
    #[error(transparent)]
    Core(#[from] spriteforge_core::CoreError),

    /// The audit was asked to run with inconsistent context.
    #[error("invalid audit context: {0}")]
    InvalidContext(String),
}
