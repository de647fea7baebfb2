//! Soft-metric suite.
//!
//! Each metric reads RGBA byte buffers, skips mutually-transparent pixels,
//! and returns a [`MetricResult`]: a score in `[0, 1]` (higher is better),
//! a pass flag against its configured threshold, and a details object that
//! lands verbatim in the per-frame metrics report.

pub mod aggregate;
pub mod alpha;
pub mod baseline;
pub mod mapd;
pub mod orphan;
pub mod palette;
pub mod ssim;

use serde::{Deserialize, Serialize};

/// Uniform result shape shared by every metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub score: f64,
    pub passed: bool,
    pub threshold: f64,
    pub details: serde_json::Value,
    pub computation_time_ms: u64,
}

impl MetricResult {
    /// True when the metric marked itself as not contributing to the
    /// composite (MAPD bypass, first frame, and similar).
    #[must_use]
    pub fn excluded_from_composite(&self) -> bool {
        self.details.get("bypassed").is_some_and(|v| v == true)
            || self.details.get("skipped").is_some()
    }
}
