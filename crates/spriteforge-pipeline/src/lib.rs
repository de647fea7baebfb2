//! Pipeline orchestration.
//!
//! This crate drives a run end to end: per-frame generation attempts,
//! auditing, retry decisions, stop conditions, and atomic state
//! persistence with resume. External collaborators (the image generator)
//! enter through the [`Generator`] trait; the orchestrator holds a value,
//! not a subclass.

#![forbid(unsafe_code)]

pub mod error;
pub mod generator;
pub mod ladder;
pub mod orchestrator;
pub mod prompt;
pub mod stop;

pub use error::PipelineError;
pub use generator::{
    Backoff, CandidateResult, GenerationParams, GenerationRequest, Generator, GeneratorError,
    ReferenceImage,
};
pub use ladder::{LadderDecision, LadderInput, RetryLadder};
pub use orchestrator::{Orchestrator, RunOutcome, RunSummary};
pub use stop::{DiagnosticReport, StopCause, StopVerdict};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
