//! Staging approved frames for the packer.
//!
//! Each approved frame is copied into `export_staging/{move}/` under the
//! name `{move}_{i:04}.png`. The zero padding guarantees lexicographic
//! sort order equals numeric frame order, which is what the packer (and
//! every engine reading the atlas) relies on. `frame_mapping.json` records
//! the provenance of every staged file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use spriteforge_core::{RunPaths, fsio};

use crate::error::ExportError;

/// One staged frame's provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMappingEntry {
    pub original_path: String,
    pub renamed: String,
    pub frame_index: u32,
}

/// Copy approved frames into the staging folder and write the mapping.
///
/// `approved` pairs each frame index with its approved image path and must
/// already be complete and ordered; staging never re-audits.
pub fn stage_frames(
    approved: &[(u32, String)],
    move_name: &str,
    paths: &RunPaths,
) -> Result<Vec<FrameMappingEntry>, ExportError> {
    if approved.is_empty() {
        return Err(ExportError::NothingToExport(
            "no approved frames to stage".into(),
        ));
    }

    let staging_dir = paths.export_staging_dir(move_name);
    std::fs::create_dir_all(&staging_dir)?;

    let mut mapping = Vec::with_capacity(approved.len());
    for (frame_index, original) in approved {
        let staged = paths.staged_frame(move_name, *frame_index);
        std::fs::copy(Path::new(original), &staged)?;
        mapping.push(FrameMappingEntry {
            original_path: original.clone(),
            renamed: staged
                .file_name()
                .expect("staged paths always carry a file name")
                .to_string_lossy()
                .into_owned(),
            frame_index: *frame_index,
        });
    }

    fsio::write_json_atomic(&paths.frame_mapping(), &mapping)?;
    log::info!(
        "staged {} frames into {}",
        mapping.len(),
        staging_dir.display()
    );
    Ok(mapping)
}
