//! Palette fidelity.
//!
//! Every opaque pixel is snapped to its nearest locked palette color by
//! Euclidean RGB distance; within tolerance counts as a match. The score is
//! the matched fraction. The report carries the worst off-palette offenders
//! so an operator can see *which* colors the generator invented.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::json;

use super::MetricResult;
use crate::frame::{FrameBuf, OPAQUE_ALPHA};

/// Off-palette colors retained in the details object.
const TOP_OFFENDERS: usize = 5;

/// Fraction of opaque pixels within `tolerance` of the locked palette.
#[must_use]
pub fn compute(
    candidate: &FrameBuf,
    palette: &[[u8; 3]],
    tolerance: f64,
    threshold: f64,
) -> MetricResult {
    let start = Instant::now();
    let mut opaque = 0u64;
    let mut matched = 0u64;
    let mut offenders: BTreeMap<[u8; 3], u32> = BTreeMap::new();

    for p in candidate.data().chunks_exact(4) {
        if p[3] < OPAQUE_ALPHA {
            continue;
        }
        opaque += 1;
        let rgb = [p[0], p[1], p[2]];
        let nearest = palette
            .iter()
            .map(|c| distance(rgb, *c))
            .fold(f64::INFINITY, f64::min);
        if nearest <= tolerance {
            matched += 1;
        } else {
            *offenders.entry(rgb).or_insert(0) += 1;
        }
    }

    let score = if opaque == 0 {
        // Nothing to judge; emptiness is HF02's problem.
        1.0
    } else {
        matched as f64 / opaque as f64
    };

    let mut top: Vec<([u8; 3], u32)> = offenders.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(TOP_OFFENDERS);
    let top_json: Vec<serde_json::Value> = top
        .iter()
        .map(|(rgb, count)| json!({"rgb": rgb, "count": count}))
        .collect();

    MetricResult {
        score,
        passed: score >= threshold,
        threshold,
        details: json!({
            "opaque_pixels": opaque,
            "matched": matched,
            "tolerance": tolerance,
            "top_off_palette": top_json,
        }),
        computation_time_ms: start.elapsed().as_millis() as u64,
    }
}

fn distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    let dr = f64::from(a[0]) - f64::from(b[0]);
    let dg = f64::from(a[1]) - f64::from(b[1]);
    let db = f64::from(a[2]) - f64::from(b[2]);
    (dr * dr + dg * dg + db * db).sqrt()
}
