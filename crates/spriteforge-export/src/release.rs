//! Release gating and the export driver.
//!
//! Runs the whole export chain (stage, preflight, pack, post-validate,
//! engine smoke test) and reduces the results to a [`ReleaseStatus`].
//! Assets always stay in the run folder; promotion to the operator's
//! output path happens only for `release-ready` atlases.

use std::path::Path;

use serde::{Deserialize, Serialize};
use spriteforge_core::{Manifest, RunPaths, fsio};

use crate::atlas::{self, AtlasPaths, ValidationReport};
use crate::engine::{EngineHarness, SmokeReport};
use crate::error::ExportError;
use crate::packer::{PackCapture, PackRequest, Packer};
use crate::preflight::{self, ChecklistReport};
use crate::staging;

/// Gating label attached to exported assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "release-ready")]
    ReleaseReady,
    #[serde(rename = "validation-failed")]
    ValidationFailed,
    #[serde(rename = "debug-only")]
    DebugOnly,
}

impl ReleaseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ReleaseReady => "release-ready",
            Self::ValidationFailed => "validation-failed",
            Self::DebugOnly => "debug-only",
        }
    }
}

/// Everything the export stage produced and decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub release: ReleaseStatus,
    pub staged_frames: u32,
    pub preflight: ChecklistReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_capture: Option<PackCapture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<SmokeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atlas: Option<AtlasPaths>,
}

impl ExportReport {
    /// Process exit code: 0 only for release-ready; everything else is 1.
    /// (Manifest and dependency failures exit earlier with 2 and 3.)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.release {
            ReleaseStatus::ReleaseReady => 0,
            _ => 1,
        }
    }
}

/// Run the export chain over a completed run's approved frames.
///
/// `approved` pairs frame indices with approved image paths, in frame
/// order. The caller obtains it from the orchestrator's final state.
pub fn run_export(
    manifest: &Manifest,
    paths: &RunPaths,
    approved: &[(u32, String)],
    packer: &dyn Packer,
    harness: &dyn EngineHarness,
) -> Result<ExportReport, ExportError> {
    let move_name = manifest.identity.move_name.clone();
    let canonical = manifest.canonical_name();

    // Dependency probes come first: a missing packer or browser is
    // exit-code-3 territory, not a validation verdict.
    packer.probe()?;
    harness.probe()?;

    // Stage.
    let mapping = staging::stage_frames(approved, &move_name, paths)?;

    // Pre-export checklist: critical failures halt before packing, even
    // under the validation-fail override (there is nothing to export yet).
    let staging_dir = paths.export_staging_dir(&move_name);
    let preflight = preflight::run_preflight(&staging_dir, manifest)?;
    if !preflight.ok() {
        for item in preflight.critical_failures() {
            log::error!("preflight {}: {}", item.id, item.description);
        }
        update_summary_release_status(paths, ReleaseStatus::ValidationFailed);
        return Ok(ExportReport {
            release: ReleaseStatus::ValidationFailed,
            staged_frames: mapping.len() as u32,
            preflight,
            pack_capture: None,
            post_validation: None,
            smoke: None,
            atlas: None,
        });
    }

    // Pack.
    std::fs::create_dir_all(paths.export_dir())?;
    let request = PackRequest {
        staging_dir,
        data_path: paths.atlas_json(&canonical),
        sheet_pattern: paths.export_dir().join(format!("{canonical}-{{n}}.png")),
        custom_flags: manifest.export.packer_flags.clone(),
    };
    let capture = packer.pack_atlas(&request)?;
    fsio::write_json_atomic(&paths.packer_log(), &capture)?;
    if !capture.ok() {
        update_summary_release_status(paths, ReleaseStatus::ValidationFailed);
        return Ok(ExportReport {
            release: ReleaseStatus::ValidationFailed,
            staged_frames: mapping.len() as u32,
            preflight,
            pack_capture: Some(capture),
            post_validation: None,
            smoke: None,
            atlas: None,
        });
    }

    // Post-export validation.
    let atlas_json = paths.atlas_json(&canonical);
    let post = atlas::post_validate(&atlas_json, &paths.export_dir(), manifest)?;
    let atlas_paths = atlas_paths_from_document(&atlas_json, &canonical, paths);

    // Engine smoke test.
    let smoke = harness.run_smoke_tests(&atlas_json, &paths.export_dir())?;

    // Gate.
    let all_passed = post.ok && smoke.ok();
    let release = if all_passed {
        ReleaseStatus::ReleaseReady
    } else if manifest.export.allow_validation_fail {
        log::warn!("validation failed; exporting debug-only assets under override");
        ReleaseStatus::DebugOnly
    } else {
        ReleaseStatus::ValidationFailed
    };

    // Promotion: release-ready assets may leave the run folder.
    if release == ReleaseStatus::ReleaseReady
        && let Some(output) = &manifest.export.output_path
        && let Some(atlas) = &atlas_paths
    {
        promote(atlas, Path::new(output))?;
    }

    update_summary_release_status(paths, release);

    Ok(ExportReport {
        release,
        staged_frames: mapping.len() as u32,
        preflight,
        pack_capture: Some(capture),
        post_validation: Some(post),
        smoke: Some(smoke),
        atlas: atlas_paths,
    })
}

/// Patch the run summary with the gate verdict; the summary predates the
/// export stage and carries "pending" until now.
fn update_summary_release_status(paths: &RunPaths, release: ReleaseStatus) {
    let summary_path = paths.summary();
    let Ok(mut summary) = fsio::read_json::<serde_json::Value>(&summary_path) else {
        return;
    };
    if let Some(object) = summary.as_object_mut() {
        object.insert(
            "release_status".to_string(),
            serde_json::Value::String(release.as_str().to_string()),
        );
        if let Err(err) = fsio::write_json_atomic(&summary_path, &summary) {
            log::warn!("could not update summary release status: {err}");
        }
    }
}

/// Resolve the finished atlas's files from its JSON.
fn atlas_paths_from_document(
    atlas_json: &Path,
    canonical: &str,
    paths: &RunPaths,
) -> Option<AtlasPaths> {
    let document = atlas::AtlasDocument::from_path(atlas_json).ok()?;
    let sheets = document
        .sheets()
        .iter()
        .map(|s| paths.export_dir().join(&s.image))
        .collect();
    Some(AtlasPaths {
        canonical_name: canonical.to_string(),
        json: atlas_json.to_path_buf(),
        sheets,
    })
}

fn promote(atlas: &AtlasPaths, output_dir: &Path) -> Result<(), ExportError> {
    std::fs::create_dir_all(output_dir)?;
    let copy_one = |src: &Path| -> Result<(), ExportError> {
        let name = src
            .file_name()
            .expect("atlas files always carry a file name");
        std::fs::copy(src, output_dir.join(name))?;
        Ok(())
    };
    copy_one(&atlas.json)?;
    for sheet in &atlas.sheets {
        copy_one(sheet)?;
    }
    log::info!(
        "promoted {} to {}",
        atlas.canonical_name,
        output_dir.display()
    );
    Ok(())
}
