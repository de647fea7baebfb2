//! Structural similarity against the anchor (identity metric).
//!
//! Block SSIM over non-overlapping 11×11 windows, computed per channel and
//! composited with weights R 0.3, G 0.4, B 0.2, A 0.1. Pixels transparent
//! in both images are skipped; windows with no visible pixel are dropped.

use std::time::Instant;

use serde_json::json;

use super::MetricResult;
use crate::frame::FrameBuf;

const BLOCK: u32 = 11;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);
const CHANNEL_WEIGHTS: [f64; 4] = [0.3, 0.4, 0.2, 0.1];

/// Compare `candidate` against `anchor`.
#[must_use]
pub fn compute(candidate: &FrameBuf, anchor: &FrameBuf, threshold: f64) -> MetricResult {
    let start = Instant::now();
    let width = candidate.width().min(anchor.width());
    let height = candidate.height().min(anchor.height());

    let mut channel_sums = [0.0f64; 4];
    let mut channel_blocks = [0u32; 4];

    let mut by = 0;
    while by < height {
        let mut bx = 0;
        while bx < width {
            for channel in 0..4 {
                if let Some(s) = block_ssim(candidate, anchor, bx, by, width, height, channel) {
                    channel_sums[channel] += s;
                    channel_blocks[channel] += 1;
                }
            }
            bx += BLOCK;
        }
        by += BLOCK;
    }

    let mut composite = 0.0;
    let mut weight_total = 0.0;
    let mut per_channel = [1.0f64; 4];
    for channel in 0..4 {
        if channel_blocks[channel] > 0 {
            per_channel[channel] = channel_sums[channel] / f64::from(channel_blocks[channel]);
            composite += CHANNEL_WEIGHTS[channel] * per_channel[channel];
            weight_total += CHANNEL_WEIGHTS[channel];
        }
    }
    let score = if weight_total > 0.0 {
        (composite / weight_total).clamp(0.0, 1.0)
    } else {
        // No visible pixels anywhere; identity is vacuously perfect and the
        // HF02 gate is what rejects empty frames.
        1.0
    };

    MetricResult {
        score,
        passed: score >= threshold,
        threshold,
        details: json!({
            "channel_ssim": {
                "r": per_channel[0],
                "g": per_channel[1],
                "b": per_channel[2],
                "a": per_channel[3],
            },
            "block_size": BLOCK,
        }),
        computation_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// SSIM of one block for one channel; `None` when every pixel in the block
/// is transparent in both images.
#[allow(clippy::too_many_arguments)]
fn block_ssim(
    candidate: &FrameBuf,
    anchor: &FrameBuf,
    bx: u32,
    by: u32,
    width: u32,
    height: u32,
    channel: usize,
) -> Option<f64> {
    let mut xs: Vec<f64> = Vec::with_capacity((BLOCK * BLOCK) as usize);
    let mut ys: Vec<f64> = Vec::with_capacity((BLOCK * BLOCK) as usize);

    for y in by..(by + BLOCK).min(height) {
        for x in bx..(bx + BLOCK).min(width) {
            let cp = candidate.pixel(x, y);
            let ap = anchor.pixel(x, y);
            if cp[3] == 0 && ap[3] == 0 {
                continue;
            }
            xs.push(f64::from(cp[channel]));
            ys.push(f64::from(ap[channel]));
        }
    }
    if xs.is_empty() {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    let mut cov = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
        cov += (x - mean_x) * (y - mean_y);
    }
    var_x /= n;
    var_y /= n;
    cov /= n;

    let numerator = (2.0 * mean_x * mean_y + C1) * (2.0 * cov + C2);
    let denominator = (mean_x * mean_x + mean_y * mean_y + C1) * (var_x + var_y + C2);
    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite(shade: u8) -> FrameBuf {
        let mut buf = FrameBuf::new(32, 32);
        for y in 8..24 {
            for x in 8..24 {
                buf.set_pixel(x, y, [shade, shade / 2, 64, 255]);
            }
        }
        buf
    }

    #[test]
    fn identical_images_score_near_one() {
        let a = sprite(200);
        let result = compute(&a, &a.clone(), 0.85);
        assert!(result.score >= 0.99, "score was {}", result.score);
        assert!(result.passed);
    }

    #[test]
    fn unrelated_images_score_low() {
        let a = sprite(250);
        let mut b = FrameBuf::new(32, 32);
        // Checkerboard with a different footprint.
        for y in 0..32 {
            for x in 0..32 {
                if (x + y) % 2 == 0 {
                    b.set_pixel(x, y, [10, 240, 10, 255]);
                }
            }
        }
        let result = compute(&a, &b, 0.85);
        assert!(result.score < 0.85, "score was {}", result.score);
        assert!(!result.passed);
    }

    #[test]
    fn mutually_transparent_pixels_do_not_dilute() {
        // Identical small sprites on large empty canvases still score ~1.
        let a = sprite(120);
        let result = compute(&a, &a.clone(), 0.85);
        assert!(result.score >= 0.99);
    }
}
