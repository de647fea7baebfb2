//! Frame auditing: normalization, hard gates, and soft metrics.
//!
//! The auditor answers one question per candidate: is this frame a faithful
//! sibling of the anchor? The answer is an [`AuditReport`] with a composite
//! score and machine-readable reason codes, produced in a fixed order:
//! Normalize → Hard Gates → Metrics → Aggregate.
//!
//! Everything here is pure with respect to run state: the auditor reads
//! images and configuration and returns reports. Persistence belongs to the
//! orchestrator.

#![forbid(unsafe_code)]

pub mod anchor;
pub mod auditor;
pub mod error;
pub mod frame;
pub mod gates;
pub mod metrics;
pub mod normalize;

pub use anchor::{AnchorAnalysis, analyze_anchor};
pub use auditor::{AuditContext, AuditOutcome, AuditReport, RecommendedAction, audit};
pub use error::AuditError;
pub use frame::FrameBuf;
pub use normalize::{NormalizeReport, normalize_frame};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AuditError>;
