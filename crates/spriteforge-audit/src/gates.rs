//! Hard gates.
//!
//! Fast structural checks that run before any metric. The first failure
//! short-circuits the audit with score 0; a frame that is the wrong size
//! or fully transparent is not worth measuring.
//!
//! | Code | Check |
//! |------|-------|
//! | HF01 | width × height equals the target canvas, 4 channels |
//! | HF02 | at least one pixel with alpha > 0 |
//! | HF03 | file decodes |
//! | HF04 | source PNG is 8-bit/channel RGBA (not indexed, not 24-bit) |
//! | HF05 | file size within configured bounds |

use std::path::Path;

use serde::{Deserialize, Serialize};
use spriteforge_core::ReasonCode;
use spriteforge_core::manifest::FileSizeBounds;

use crate::frame::FrameBuf;

/// Result of the gate pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    /// Short codes of gates that ran and passed, in execution order.
    pub passed: Vec<String>,
    /// First failing gate, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<ReasonCode>,
}

impl GateReport {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.failed.is_none()
    }
}

/// PNG IHDR fields needed for the color-depth gate.
#[derive(Debug, Clone, Copy)]
struct PngHeader {
    bit_depth: u8,
    color_type: u8,
}

/// Peek at the IHDR chunk without decoding the image. The decoder expands
/// indexed and 24-bit files to RGBA, so the on-disk depth is only visible
/// here.
fn png_header(path: &Path) -> Option<PngHeader> {
    let bytes = std::fs::read(path).ok()?;
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
    // Signature, IHDR length+tag, 13-byte IHDR payload.
    if bytes.len() < 33 || bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    Some(PngHeader {
        bit_depth: bytes[24],
        color_type: bytes[25],
    })
}

/// True when the file at `path` is an 8-bit-per-channel RGBA PNG on disk.
/// Shared with the export checklist, which re-verifies staged frames.
#[must_use]
pub fn is_rgba8_png(path: &Path) -> bool {
    png_header(path).is_some_and(|h| h.color_type == 6 && h.bit_depth == 8)
}

fn enabled(gates: &[String], short: &str) -> bool {
    gates.iter().any(|g| g.starts_with(short))
}

/// Run the enabled hard gates against `path`.
///
/// Returns the decoded buffer alongside the report when every gate passed,
/// so the auditor never decodes a candidate twice.
#[must_use]
pub fn run_hard_gates(
    path: &Path,
    target_size: u32,
    bounds: FileSizeBounds,
    gates: &[String],
) -> (GateReport, Option<FrameBuf>) {
    let mut report = GateReport {
        passed: Vec::new(),
        failed: None,
    };

    // HF05 first: a stat is cheaper than a decode.
    if enabled(gates, "HF05") {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size < bounds.min_bytes || size > bounds.max_bytes {
            report.failed = Some(ReasonCode::Hf05FileSize);
            return (report, None);
        }
        report.passed.push("HF05".into());
    }

    // HF03: the file must decode at all.
    let buf = match FrameBuf::load_png(path) {
        Ok(buf) => buf,
        Err(_) => {
            if enabled(gates, "HF03") {
                report.failed = Some(ReasonCode::Hf03Corrupted);
                return (report, None);
            }
            return (report, None);
        }
    };
    if enabled(gates, "HF03") {
        report.passed.push("HF03".into());
    }

    // HF04: 8-bit RGBA on disk (PNG color type 6).
    if enabled(gates, "HF04") {
        if !is_rgba8_png(path) {
            report.failed = Some(ReasonCode::Hf04WrongColorDepth);
            return (report, None);
        }
        report.passed.push("HF04".into());
    }

    // HF01: canonical canvas.
    if enabled(gates, "HF01") {
        if buf.width() != target_size || buf.height() != target_size {
            report.failed = Some(ReasonCode::Hf01DimensionMismatch);
            return (report, None);
        }
        report.passed.push("HF01".into());
    }

    // HF02: not invisible.
    if enabled(gates, "HF02") {
        if !buf.has_any_visible_pixel() {
            report.failed = Some(ReasonCode::Hf02FullyTransparent);
            return (report, None);
        }
        report.passed.push("HF02".into());
    }

    (report, Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spriteforge_core::manifest::FileSizeBounds;

    fn all_gates() -> Vec<String> {
        ["HF01", "HF02", "HF03", "HF04", "HF05"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn loose_bounds() -> FileSizeBounds {
        FileSizeBounds {
            min_bytes: 1,
            max_bytes: 10 * 1024 * 1024,
        }
    }

    fn unique_dir(prefix: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn visible_frame(size: u32) -> FrameBuf {
        let mut buf = FrameBuf::new(size, size);
        buf.set_pixel(size / 2, size / 2, [10, 20, 30, 255]);
        buf
    }

    #[test]
    fn well_formed_frame_passes_all_gates() {
        let dir = unique_dir("gates-pass");
        let path = dir.join("frame.png");
        visible_frame(16).save_png(&path).unwrap();
        let (report, buf) = run_hard_gates(&path, 16, loose_bounds(), &all_gates());
        assert!(report.ok(), "failed: {:?}", report.failed);
        assert_eq!(report.passed, vec!["HF05", "HF03", "HF04", "HF01", "HF02"]);
        assert!(buf.is_some());
    }

    #[test]
    fn wrong_dimensions_fail_hf01() {
        let dir = unique_dir("gates-dim");
        let path = dir.join("frame.png");
        visible_frame(24).save_png(&path).unwrap();
        let (report, buf) = run_hard_gates(&path, 16, loose_bounds(), &all_gates());
        assert_eq!(report.failed, Some(ReasonCode::Hf01DimensionMismatch));
        assert!(buf.is_none());
    }

    #[test]
    fn fully_transparent_fails_hf02() {
        let dir = unique_dir("gates-alpha");
        let path = dir.join("frame.png");
        FrameBuf::new(16, 16).save_png(&path).unwrap();
        let (report, _) = run_hard_gates(&path, 16, loose_bounds(), &all_gates());
        assert_eq!(report.failed, Some(ReasonCode::Hf02FullyTransparent));
    }

    #[test]
    fn garbage_file_fails_hf03() {
        let dir = unique_dir("gates-corrupt");
        let path = dir.join("frame.png");
        std::fs::write(&path, b"not actually a png, but long enough to pass HF05's floor")
            .unwrap();
        let (report, _) = run_hard_gates(&path, 16, loose_bounds(), &all_gates());
        assert_eq!(report.failed, Some(ReasonCode::Hf03Corrupted));
    }

    #[test]
    fn tiny_file_fails_hf05_before_decoding() {
        let dir = unique_dir("gates-size");
        let path = dir.join("frame.png");
        visible_frame(16).save_png(&path).unwrap();
        let bounds = FileSizeBounds {
            min_bytes: 1024 * 1024,
            max_bytes: 2 * 1024 * 1024,
        };
        let (report, _) = run_hard_gates(&path, 16, bounds, &all_gates());
        assert_eq!(report.failed, Some(ReasonCode::Hf05FileSize));
        assert!(report.passed.is_empty());
    }

    #[test]
    fn disabled_gate_does_not_run() {
        let dir = unique_dir("gates-disabled");
        let path = dir.join("frame.png");
        visible_frame(24).save_png(&path).unwrap();
        // HF01 disabled: the wrong-size frame sails through.
        let gates: Vec<String> = ["HF02", "HF03", "HF04", "HF05"]
            .into_iter()
            .map(str::to_string)
            .collect();
        let (report, buf) = run_hard_gates(&path, 16, loose_bounds(), &gates);
        assert!(report.ok());
        assert!(buf.is_some());
    }
}
