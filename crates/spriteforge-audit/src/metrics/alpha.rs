//! Alpha-artifact scan.
//!
//! Looks at edge pixels: visible pixels 4-adjacent to fully transparent
//! ones (canvas borders count as transparent). Two artifact classes:
//! - halo: alpha strictly between 1 and 254 (soft blending the engine will
//!   render as a gray rim)
//! - fringe: bright pixel (mean RGB > 200) that is nearly opaque (alpha >
//!   200), the classic white matte leftover
//!
//! Severity is (halo + fringe) / edge_pixels.

use std::time::Instant;

use serde_json::json;

use super::MetricResult;
use crate::frame::FrameBuf;

/// Scan for halos and fringes along sprite edges.
#[must_use]
pub fn compute(candidate: &FrameBuf, threshold: f64) -> MetricResult {
    let start = Instant::now();
    let (width, height) = (candidate.width(), candidate.height());
    let mut edge_pixels = 0u64;
    let mut halo = 0u64;
    let mut fringe = 0u64;

    for y in 0..height {
        for x in 0..width {
            let p = candidate.pixel(x, y);
            if p[3] == 0 {
                continue;
            }
            if !touches_transparent(candidate, x, y) {
                continue;
            }
            edge_pixels += 1;
            if p[3] > 1 && p[3] < 254 {
                halo += 1;
            }
            let brightness = (u32::from(p[0]) + u32::from(p[1]) + u32::from(p[2])) / 3;
            if brightness > 200 && p[3] > 200 {
                fringe += 1;
            }
        }
    }

    let severity = if edge_pixels == 0 {
        0.0
    } else {
        (halo + fringe) as f64 / edge_pixels as f64
    };
    let score = (1.0 - severity).clamp(0.0, 1.0);

    MetricResult {
        score,
        passed: severity <= threshold,
        threshold,
        details: json!({
            "edge_pixels": edge_pixels,
            "halo": halo,
            "fringe": fringe,
            "severity": severity,
        }),
        computation_time_ms: start.elapsed().as_millis() as u64,
    }
}

fn touches_transparent(buf: &FrameBuf, x: u32, y: u32) -> bool {
    let neighbors = [
        (x.wrapping_sub(1), y),
        (x + 1, y),
        (x, y.wrapping_sub(1)),
        (x, y + 1),
    ];
    for (nx, ny) in neighbors {
        if nx >= buf.width() || ny >= buf.height() {
            return true; // canvas border counts as transparent
        }
        if buf.alpha(nx, ny) == 0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_block() -> FrameBuf {
        let mut buf = FrameBuf::new(16, 16);
        for y in 4..12 {
            for x in 4..12 {
                buf.set_pixel(x, y, [60, 60, 120, 255]);
            }
        }
        buf
    }

    #[test]
    fn clean_edges_pass() {
        let result = compute(&solid_block(), 0.20);
        assert!((result.score - 1.0).abs() < 1e-9);
        assert!(result.passed);
        assert_eq!(result.details["halo"], 0);
    }

    #[test]
    fn soft_alpha_edge_counts_as_halo() {
        let mut buf = solid_block();
        // Repaint the top edge row with partial alpha.
        for x in 4..12 {
            buf.set_pixel(x, 4, [60, 60, 120, 128]);
        }
        let result = compute(&buf, 0.20);
        assert!(result.details["halo"].as_u64().unwrap() >= 8);
        assert!(!result.passed);
    }

    #[test]
    fn bright_opaque_edge_counts_as_fringe() {
        let mut buf = solid_block();
        for x in 4..12 {
            buf.set_pixel(x, 11, [250, 250, 250, 255]);
        }
        let result = compute(&buf, 0.05);
        assert!(result.details["fringe"].as_u64().unwrap() >= 8);
        assert!(!result.passed);
    }

    #[test]
    fn empty_frame_reports_zero_severity() {
        let result = compute(&FrameBuf::new(8, 8), 0.20);
        assert_eq!(result.details["edge_pixels"], 0);
        assert!(result.passed);
    }
}
