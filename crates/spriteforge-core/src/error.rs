//! Error type for core data-model and filesystem operations.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the core crate.
///
/// Reason codes (`HFxx`/`SFxx`/...) are not errors: they are data carried in
/// audit reports and attempt records. Only genuine failures surface here.
#[derive(Error, Debug)]
pub enum CoreError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The manifest failed INIT-time validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Another live process holds the run-folder lock.
    #[error("run folder locked by pid {pid}: {path}")]
    LockHeld {
        /// PID recorded in the lock file.
        pid: u32,
        /// Path of the lock file.
        path: PathBuf,
    },

    /// Persisted state contradicts its own invariants.
    #[error("corrupt run state: {0}")]
    CorruptState(String),
}
