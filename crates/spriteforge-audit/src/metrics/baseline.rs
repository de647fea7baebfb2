//! Baseline drift.
//!
//! The baseline is the bottom-most row with alpha ≥ 128. Drift is measured
//! in pixels against the anchor's baseline: positive means the sprite sank,
//! negative means it floats. Characters that wander off the ground line are
//! the most visible defect an atlas can ship.

use std::time::Instant;

use serde_json::json;

use super::MetricResult;
use crate::frame::FrameBuf;

/// Measure drift between the candidate baseline and `anchor_baseline`.
#[must_use]
pub fn compute(candidate: &FrameBuf, anchor_baseline: u32, threshold_px: u32) -> MetricResult {
    let start = Instant::now();
    let threshold = f64::from(threshold_px);

    let Some(cand_baseline) = candidate.baseline_row() else {
        // No visible pixels; HF02 owns this case. Report maximal drift so a
        // misconfigured gate set still surfaces the problem.
        return MetricResult {
            score: 0.0,
            passed: false,
            threshold,
            details: json!({"error": "no_opaque_pixels"}),
            computation_time_ms: start.elapsed().as_millis() as u64,
        };
    };

    let drift = i64::from(cand_baseline) - i64::from(anchor_baseline);
    let direction = match drift.signum() {
        1 => "sinking",
        -1 => "floating",
        _ => "none",
    };
    let magnitude = drift.unsigned_abs() as f64;

    // Linear falloff: zero drift scores 1.0, four thresholds of drift
    // scores 0.0.
    let falloff = (4.0 * threshold.max(1.0)).max(1.0);
    let score = (1.0 - magnitude / falloff).clamp(0.0, 1.0);

    MetricResult {
        score,
        passed: magnitude <= threshold,
        threshold,
        details: json!({
            "candidate_baseline": cand_baseline,
            "anchor_baseline": anchor_baseline,
            "drift_px": drift,
            "direction": direction,
        }),
        computation_time_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite_with_baseline(row: u32) -> FrameBuf {
        let mut buf = FrameBuf::new(32, 32);
        for y in (row - 4)..=row {
            for x in 10..20 {
                buf.set_pixel(x, y, [80, 80, 80, 255]);
            }
        }
        buf
    }

    #[test]
    fn zero_drift_scores_one() {
        let result = compute(&sprite_with_baseline(24), 24, 4);
        assert!((result.score - 1.0).abs() < 1e-9);
        assert!(result.passed);
        assert_eq!(result.details["direction"], "none");
    }

    #[test]
    fn sinking_within_threshold_passes() {
        let result = compute(&sprite_with_baseline(27), 24, 4);
        assert!(result.passed);
        assert_eq!(result.details["direction"], "sinking");
        assert_eq!(result.details["drift_px"], 3);
    }

    #[test]
    fn floating_beyond_threshold_fails() {
        let result = compute(&sprite_with_baseline(18), 24, 4);
        assert!(!result.passed);
        assert_eq!(result.details["direction"], "floating");
        assert_eq!(result.details["drift_px"], -6);
    }
}
