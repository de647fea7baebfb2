//! Anchor analysis.
//!
//! The anchor is analyzed exactly once, at INIT, and the result is persisted
//! to `anchor_analysis.json`. Every later alignment and metric decision
//! measures against these numbers, never against a re-read of the anchor
//! file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::frame::{FrameBuf, PaletteEntry};

/// How many fingerprint colors are retained.
const PALETTE_FINGERPRINT_SIZE: usize = 16;

/// Geometry and palette identity of the locked anchor sprite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorAnalysis {
    pub width: u32,
    pub height: u32,
    /// Bottom-most opaque row: the ground line.
    pub baseline_row: u32,
    /// Contact-patch centroid `(x, y)` in anchor pixel coordinates.
    pub contact_centroid: [f64; 2],
    /// Inclusive opaque bounding box `[x0, y0, x1, y1]`.
    pub opaque_bbox: [u32; 4],
    /// Dominant opaque colors, most frequent first.
    pub palette_fingerprint: Vec<PaletteEntry>,
    /// Ratio used for the contact patch, recorded for reproducibility.
    pub root_zone_ratio: f64,
}

/// Analyze the anchor sprite at `path`.
///
/// Fails when the anchor has no opaque pixels: an invisible anchor cannot
/// define identity, palette, or baseline.
pub fn analyze_anchor(path: &Path, root_zone_ratio: f64) -> Result<AnchorAnalysis, AuditError> {
    let buf = FrameBuf::load_png(path)?;
    analyze_anchor_buf(&buf, root_zone_ratio)
}

/// Analyze an already-decoded anchor buffer.
pub fn analyze_anchor_buf(
    buf: &FrameBuf,
    root_zone_ratio: f64,
) -> Result<AnchorAnalysis, AuditError> {
    let (x0, y0, x1, y1) = buf.opaque_bbox().ok_or_else(|| {
        AuditError::InvalidContext("anchor has no opaque pixels".to_string())
    })?;
    let baseline_row = buf
        .baseline_row()
        .expect("bbox implies at least one opaque row");
    let (cx, cy) = buf
        .root_zone_centroid(root_zone_ratio)
        .expect("bbox implies a non-empty root zone");

    Ok(AnchorAnalysis {
        width: buf.width(),
        height: buf.height(),
        baseline_row,
        contact_centroid: [cx, cy],
        opaque_bbox: [x0, y0, x1, y1],
        palette_fingerprint: buf.palette_fingerprint(PALETTE_FINGERPRINT_SIZE),
        root_zone_ratio,
    })
}
