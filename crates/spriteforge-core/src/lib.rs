//! Core data model and run-folder plumbing for the spriteforge pipeline.
//!
//! This crate provides:
//! - Manifest model: typed input schema, INIT-time validation, canonical hashing
//! - Reason codes: the stable machine-readable taxonomy driving retries
//! - Run state: per-run / per-frame / per-attempt records with accounting invariants
//! - Deterministic seeds: CRC32 over (run_id, frame, attempt)
//! - Run-folder layout: deterministic paths, atomic JSON writes, lock files
//! - Audit log: JSONL event stream with schema validation and secret redaction

#![forbid(unsafe_code)]

pub mod audit_log;
pub mod canon;
pub mod clock;
pub mod error;
pub mod fsio;
pub mod manifest;
pub mod paths;
pub mod reason;
pub mod seed;
pub mod state;

pub use audit_log::{AuditEvent, AuditLogWriter, EventLevel, EventOutcome};
pub use error::CoreError;
pub use manifest::Manifest;
pub use paths::RunPaths;
pub use reason::{CodeFamily, ReasonCode};
pub use state::{AttemptRecord, FrameState, FrameStatus, RunState, RunStatus};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;
