//! Export pipeline: staging, packing, validation, release gating.
//!
//! Approved frames are staged under a deterministic naming contract,
//! packed into a texture atlas by an external packer running a locked flag
//! set, then validated three ways: a pre-export checklist, a post-export
//! parse of the emitted atlas, and a headless engine smoke test. The gate
//! verdict decides whether the assets leave the run folder.

#![forbid(unsafe_code)]

pub mod atlas;
pub mod engine;
pub mod error;
pub mod packer;
pub mod preflight;
pub mod release;
pub mod staging;

pub use atlas::{AtlasDocument, AtlasPaths, ValidationIssue, ValidationReport};
pub use engine::{EngineHarness, NullHarness, SmokeAssertion, SmokeReport};
pub use error::ExportError;
pub use packer::{CommandPacker, PackCapture, PackRequest, Packer};
pub use preflight::{ChecklistItem, ChecklistReport, Severity};
pub use release::{ExportReport, ReleaseStatus, run_export};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ExportError>;
