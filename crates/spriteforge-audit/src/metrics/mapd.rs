//! Mean absolute pixel difference (temporal coherence).
//!
//! Measures how much a frame moved relative to its approved predecessor,
//! over the mutually-opaque mask, normalized to `[0, 1]` by `3 · 255`.
//! The pass threshold depends on the move type: an idle loop should barely
//! move, a run cycle is allowed to. Moves whose names contain a bypass
//! keyword (attack, jump, hit, death, special) skip the check entirely:
//! large deltas are the point of those animations.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::json;

use super::MetricResult;
use crate::frame::{FrameBuf, OPAQUE_ALPHA};

/// Built-in thresholds by move-type keyword, checked as substrings.
const MOVE_TYPE_THRESHOLDS: [(&str, f64); 4] = [
    ("idle", 0.02),
    ("block", 0.05),
    ("walk", 0.10),
    ("run", 0.15),
];

/// Fallback when no move type matches.
const DEFAULT_THRESHOLD: f64 = 0.10;

/// Threshold for a move name: exact override first, then keyword table.
#[must_use]
pub fn threshold_for(move_name: &str, overrides: &BTreeMap<String, f64>) -> f64 {
    if let Some(t) = overrides.get(move_name) {
        return *t;
    }
    for (keyword, t) in MOVE_TYPE_THRESHOLDS {
        if move_name.contains(keyword) {
            return t;
        }
    }
    DEFAULT_THRESHOLD
}

/// True when the move name forces a MAPD bypass.
#[must_use]
pub fn is_bypassed(move_name: &str, bypass_moves: &[String]) -> bool {
    bypass_moves.iter().any(|kw| move_name.contains(kw.as_str()))
}

/// Compare `candidate` with the previous approved frame.
///
/// Returns a result flagged `bypassed` or `skipped` (and excluded from the
/// composite) when the move bypasses MAPD or no previous frame exists.
#[must_use]
pub fn compute(
    candidate: &FrameBuf,
    previous: Option<&FrameBuf>,
    move_name: &str,
    bypass_moves: &[String],
    overrides: &BTreeMap<String, f64>,
) -> MetricResult {
    let start = Instant::now();
    let threshold = threshold_for(move_name, overrides);

    if is_bypassed(move_name, bypass_moves) {
        return MetricResult {
            score: 1.0,
            passed: true,
            threshold,
            details: json!({"bypassed": true, "move": move_name}),
            computation_time_ms: start.elapsed().as_millis() as u64,
        };
    }
    let Some(previous) = previous else {
        return MetricResult {
            score: 1.0,
            passed: true,
            threshold,
            details: json!({"skipped": "first_frame"}),
            computation_time_ms: start.elapsed().as_millis() as u64,
        };
    };

    let width = candidate.width().min(previous.width());
    let height = candidate.height().min(previous.height());
    let mut sum = 0.0f64;
    let mut pixels = 0u64;
    for y in 0..height {
        for x in 0..width {
            let cp = candidate.pixel(x, y);
            let pp = previous.pixel(x, y);
            if cp[3] < OPAQUE_ALPHA || pp[3] < OPAQUE_ALPHA {
                continue;
            }
            let delta = (i32::from(cp[0]) - i32::from(pp[0])).abs()
                + (i32::from(cp[1]) - i32::from(pp[1])).abs()
                + (i32::from(cp[2]) - i32::from(pp[2])).abs();
            sum += f64::from(delta) / (3.0 * 255.0);
            pixels += 1;
        }
    }

    // Disjoint masks mean the sprite teleported: maximal difference.
    let mapd = if pixels == 0 { 1.0 } else { sum / pixels as f64 };
    MetricResult {
        score: (1.0 - mapd).clamp(0.0, 1.0),
        passed: mapd <= threshold,
        threshold,
        details: json!({
            "mapd": mapd,
            "mutual_pixels": pixels,
            "move": move_name,
        }),
        computation_time_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_bypass() -> Vec<String> {
        ["attack", "jump", "hit", "death", "special"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn shaded(shade: u8) -> FrameBuf {
        let mut buf = FrameBuf::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                buf.set_pixel(x, y, [shade, shade, shade, 255]);
            }
        }
        buf
    }

    #[test]
    fn thresholds_follow_move_type() {
        let overrides = BTreeMap::new();
        assert!((threshold_for("idle", &overrides) - 0.02).abs() < 1e-9);
        assert!((threshold_for("run_cycle", &overrides) - 0.15).abs() < 1e-9);
        assert!((threshold_for("taunt", &overrides) - DEFAULT_THRESHOLD).abs() < 1e-9);
        let mut with_override = BTreeMap::new();
        with_override.insert("taunt".to_string(), 0.07);
        assert!((threshold_for("taunt", &with_override) - 0.07).abs() < 1e-9);
    }

    #[test]
    fn attack_move_bypasses_regardless_of_delta() {
        let big_delta_prev = shaded(10);
        let candidate = shaded(200);
        let result = compute(
            &candidate,
            Some(&big_delta_prev),
            "attack",
            &default_bypass(),
            &BTreeMap::new(),
        );
        assert_eq!(result.details["bypassed"], true);
        assert!(result.passed);
        assert!(result.excluded_from_composite());
    }

    #[test]
    fn first_frame_skips() {
        let result = compute(&shaded(50), None, "idle", &default_bypass(), &BTreeMap::new());
        assert!(result.passed);
        assert!(result.excluded_from_composite());
    }

    #[test]
    fn idle_move_fails_on_large_delta() {
        // Mean per-channel delta of 90/255 ≈ 0.35, way over idle's 0.02.
        let result = compute(
            &shaded(100),
            Some(&shaded(190)),
            "idle",
            &default_bypass(),
            &BTreeMap::new(),
        );
        assert!(!result.passed);
        assert!(!result.excluded_from_composite());
        let mapd = result.details["mapd"].as_f64().unwrap();
        assert!((mapd - 90.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn identical_frames_pass_idle() {
        let result = compute(
            &shaded(50),
            Some(&shaded(50)),
            "idle",
            &default_bypass(),
            &BTreeMap::new(),
        );
        assert!(result.passed);
        assert!((result.score - 1.0).abs() < 1e-9);
    }
}
