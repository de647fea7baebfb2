//! Orphan-pixel count (pixel noise).
//!
//! An opaque pixel is an orphan when no 4-neighbor shares its exact RGBA
//! value: generator speckle that reads as dirt at pixel-art scale. Counts
//! are tiered: a handful passes, a moderate number warns, beyond that the
//! frame soft-fails.

use std::time::Instant;

use serde_json::json;

use super::MetricResult;
use crate::frame::{FrameBuf, OPAQUE_ALPHA};

/// Tier classification for the details object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Pass,
    Warning,
    SoftFail,
}

/// Count orphans and classify against the configured tiers.
#[must_use]
pub fn compute(candidate: &FrameBuf, pass_tier: u32, warn_tier: u32) -> MetricResult {
    let start = Instant::now();
    let (width, height) = (candidate.width(), candidate.height());
    let mut orphans = 0u32;

    for y in 0..height {
        for x in 0..width {
            let p = candidate.pixel(x, y);
            if p[3] < OPAQUE_ALPHA {
                continue;
            }
            let mut has_twin = false;
            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbors {
                if nx < width && ny < height && candidate.pixel(nx, ny) == p {
                    has_twin = true;
                    break;
                }
            }
            if !has_twin {
                orphans += 1;
            }
        }
    }

    let tier = if orphans <= pass_tier {
        Tier::Pass
    } else if orphans <= warn_tier {
        Tier::Warning
    } else {
        Tier::SoftFail
    };

    // Score decays linearly, hitting zero at four times the warning tier.
    let cap = f64::from(warn_tier.max(1)) * 4.0;
    let score = (1.0 - f64::from(orphans) / cap).clamp(0.0, 1.0);

    MetricResult {
        score,
        passed: tier != Tier::SoftFail,
        threshold: f64::from(warn_tier),
        details: json!({
            "orphans": orphans,
            "tier": match tier {
                Tier::Pass => "pass",
                Tier::Warning => "warning",
                Tier::SoftFail => "soft_fail",
            },
            "pass_tier": pass_tier,
            "warn_tier": warn_tier,
        }),
        computation_time_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_orphans(count: u32) -> FrameBuf {
        let mut buf = FrameBuf::new(32, 32);
        // A solid base block: every pixel has an identical neighbor.
        for y in 0..8 {
            for x in 0..8 {
                buf.set_pixel(x, y, [50, 50, 50, 255]);
            }
        }
        // Isolated unique pixels spaced apart on empty canvas.
        for i in 0..count {
            let x = 10 + (i % 10) * 2;
            let y = 10 + (i / 10) * 2;
            buf.set_pixel(x, y, [200, (i % 255) as u8, 10, 255]);
        }
        buf
    }

    #[test]
    fn clean_frame_passes() {
        let result = compute(&with_orphans(0), 5, 15);
        assert_eq!(result.details["orphans"], 0);
        assert_eq!(result.details["tier"], "pass");
        assert!(result.passed);
    }

    #[test]
    fn moderate_count_warns_but_passes() {
        let result = compute(&with_orphans(10), 5, 15);
        assert_eq!(result.details["tier"], "warning");
        assert!(result.passed);
    }

    #[test]
    fn heavy_noise_soft_fails() {
        let result = compute(&with_orphans(30), 5, 15);
        assert_eq!(result.details["tier"], "soft_fail");
        assert!(!result.passed);
    }
}
