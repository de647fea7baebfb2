//! Pre-export validation checklist.
//!
//! Twelve checks over the staging folder, run before the packer is ever
//! invoked. Critical failures block packing; warning items (bounding-box
//! variance) are recorded but do not gate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::Digest;
use spriteforge_audit::frame::FrameBuf;
use spriteforge_audit::gates::is_rgba8_png;
use spriteforge_core::Manifest;

use crate::error::ExportError;

/// Checklist item severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

/// One checklist line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The full checklist verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistReport {
    pub items: Vec<ChecklistItem>,
}

impl ChecklistReport {
    /// True when every critical item passed.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.passed || item.severity == Severity::Warning)
    }

    /// Failed critical items, for terminal output.
    #[must_use]
    pub fn critical_failures(&self) -> Vec<&ChecklistItem> {
        self.items
            .iter()
            .filter(|item| !item.passed && item.severity == Severity::Critical)
            .collect()
    }
}

/// Run the checklist over the staging folder.
pub fn run_preflight(
    staging_dir: &Path,
    manifest: &Manifest,
) -> Result<ChecklistReport, ExportError> {
    let move_name = &manifest.identity.move_name;
    let expected = manifest.identity.frame_count;
    let target = manifest.canvas.target_size;
    let bounds = manifest.auditor.file_size_bounds;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(staging_dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();

    let (frames, strays): (Vec<&PathBuf>, Vec<&PathBuf>) = entries
        .iter()
        .partition(|p| file_name_matches(p, move_name));

    let mut items = Vec::with_capacity(12);
    let mut push = |id: &str, description: &str, severity, passed: bool, detail: Option<String>| {
        items.push(ChecklistItem {
            id: id.to_string(),
            description: description.to_string(),
            severity,
            passed,
            detail,
        });
    };

    // 1. Frame count.
    push(
        "frame_count",
        "staged frame count matches the manifest",
        Severity::Critical,
        frames.len() as u32 == expected,
        Some(format!("staged {} expected {expected}", frames.len())),
    );

    // 5. Naming contract (checked early; later items only look at frames).
    push(
        "naming",
        "file names match {move}_NNNN.png",
        Severity::Critical,
        strays.iter().all(|p| !is_png(p)) && !frames.is_empty(),
        None,
    );

    // 9. No stray files.
    push(
        "no_stray_files",
        "staging folder contains only staged frames",
        Severity::Critical,
        strays.is_empty(),
        (!strays.is_empty()).then(|| {
            strays
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }),
    );

    // 10. Contiguous indices 0..N-1.
    let mut indices: Vec<u32> = frames.iter().filter_map(|p| frame_index(p)).collect();
    indices.sort_unstable();
    let contiguous = indices
        .iter()
        .enumerate()
        .all(|(i, idx)| *idx == i as u32)
        && indices.len() == frames.len();
    push(
        "contiguous_indices",
        "frame indices run 0..N-1 without gaps",
        Severity::Critical,
        contiguous,
        Some(format!("indices: {indices:?}")),
    );

    // 2/3/4/8: per-frame image checks.
    let mut decode_ok = true;
    let mut dims_ok = true;
    let mut channels_ok = true;
    let mut depth_ok = true;
    let mut hashes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut sizes_ok = true;
    let mut total_bytes = 0u64;
    let mut bbox_areas: Vec<f64> = Vec::new();
    let mut first_problem: Option<String> = None;

    for path in &frames {
        let meta_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        total_bytes += meta_len;
        if meta_len < bounds.min_bytes || meta_len > bounds.max_bytes {
            sizes_ok = false;
        }
        if !is_rgba8_png(path) {
            depth_ok = false;
        }
        match FrameBuf::load_png(path) {
            Ok(buf) => {
                if buf.width() != target || buf.height() != target {
                    dims_ok = false;
                    first_problem.get_or_insert(format!(
                        "{}: {}x{}",
                        path.display(),
                        buf.width(),
                        buf.height()
                    ));
                }
                // Decoded buffers are RGBA by construction; the channel
                // check is the decode succeeding with 4 bytes per pixel.
                channels_ok &= buf.data().len()
                    == (buf.width() as usize) * (buf.height() as usize) * 4;
                if let Some((x0, y0, x1, y1)) = buf.opaque_bbox() {
                    bbox_areas
                        .push(f64::from(x1 - x0 + 1) * f64::from(y1 - y0 + 1));
                }
                let digest = sha2::Sha256::digest(buf.data());
                let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
                hashes.entry(hex).or_default().push(path.display().to_string());
            }
            Err(_) => {
                decode_ok = false;
                first_problem.get_or_insert(format!("{}: decode failed", path.display()));
            }
        }
    }

    push(
        "dimensions",
        "every frame is target_size x target_size",
        Severity::Critical,
        dims_ok,
        first_problem.clone(),
    );
    push(
        "channels",
        "every frame decodes to 4 channels",
        Severity::Critical,
        channels_ok,
        None,
    );
    push(
        "decodable",
        "every frame decodes without error",
        Severity::Critical,
        decode_ok,
        first_problem,
    );
    push(
        "color_depth",
        "every frame is 32-bit RGBA on disk",
        Severity::Critical,
        depth_ok,
        None,
    );

    // 6. Duplicate content.
    let duplicates: Vec<&Vec<String>> =
        hashes.values().filter(|paths| paths.len() > 1).collect();
    push(
        "no_duplicates",
        "no two frames share a pixel-content hash",
        Severity::Critical,
        duplicates.is_empty(),
        (!duplicates.is_empty()).then(|| format!("{duplicates:?}")),
    );

    // 7. Individual file sizes.
    push(
        "file_sizes",
        "every frame's file size is within bounds",
        Severity::Critical,
        sizes_ok,
        None,
    );

    // 11. Total staged size.
    push(
        "total_size",
        "total staged bytes within the export ceiling",
        Severity::Critical,
        total_bytes <= manifest.export.max_staged_bytes,
        Some(format!(
            "{total_bytes} of {} bytes",
            manifest.export.max_staged_bytes
        )),
    );

    // 12. Bounding-box variance (warning only): wildly different opaque
    // footprints usually mean one frame lost its subject.
    let bbox_ok = if bbox_areas.len() < 2 {
        true
    } else {
        let mean = bbox_areas.iter().sum::<f64>() / bbox_areas.len() as f64;
        bbox_areas
            .iter()
            .all(|a| (a - mean).abs() <= mean * 0.20)
    };
    push(
        "bbox_variance",
        "opaque bounding-box area within ±20% of the mean",
        Severity::Warning,
        bbox_ok,
        None,
    );

    Ok(ChecklistReport { items })
}

fn is_png(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "png")
}

/// `{move}_NNNN.png`, exactly four digits.
fn file_name_matches(path: &Path, move_name: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(rest) = name
        .strip_prefix(move_name)
        .and_then(|r| r.strip_prefix('_'))
        .and_then(|r| r.strip_suffix(".png"))
    else {
        return false;
    };
    rest.len() == 4 && rest.chars().all(|c| c.is_ascii_digit())
}

fn frame_index(path: &Path) -> Option<u32> {
    let name = path.file_stem()?.to_str()?;
    name.rsplit('_').next()?.parse().ok()
}
