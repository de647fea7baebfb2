//! Deterministic run-folder layout.
//!
//! ```text
//! runs/{run_id}/
//!   lock
//!   state.json
//!   manifest.snapshot.json
//!   anchor_analysis.json
//!   candidates/frame_{i:04}_try_{k}.png
//!   approved/frame_{i:04}.png
//!   rejected/frame_{i:04}_try_{k}.png
//!   audit/frame_{i:04}_metrics.json
//!   audit/audit_log.jsonl
//!   export_staging/{move}/{move}_{i:04}.png
//!   export/...
//!   diagnostic.json
//!   summary.json
//! ```
//!
//! All path math lives here so the rest of the pipeline never formats a
//! frame filename by hand.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Zero-padded frame index used in every frame filename.
#[must_use]
pub fn frame_index_str(index: u32) -> String {
    format!("{index:04}")
}

/// Path builders rooted at one run folder.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    /// Lay out paths for `run_id` under `runs_root`.
    #[must_use]
    pub fn new(runs_root: impl AsRef<Path>, run_id: &str) -> Self {
        Self {
            root: runs_root.as_ref().join(run_id),
        }
    }

    /// Wrap an existing run folder.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    #[must_use]
    pub fn state_json(&self) -> PathBuf {
        self.root.join("state.json")
    }

    #[must_use]
    pub fn manifest_snapshot(&self) -> PathBuf {
        self.root.join("manifest.snapshot.json")
    }

    #[must_use]
    pub fn anchor_analysis(&self) -> PathBuf {
        self.root.join("anchor_analysis.json")
    }

    #[must_use]
    pub fn candidates_dir(&self) -> PathBuf {
        self.root.join("candidates")
    }

    #[must_use]
    pub fn candidate(&self, frame: u32, attempt: u32) -> PathBuf {
        self.candidates_dir()
            .join(format!("frame_{}_try_{attempt}.png", frame_index_str(frame)))
    }

    #[must_use]
    pub fn approved_dir(&self) -> PathBuf {
        self.root.join("approved")
    }

    #[must_use]
    pub fn approved_frame(&self, frame: u32) -> PathBuf {
        self.approved_dir()
            .join(format!("frame_{}.png", frame_index_str(frame)))
    }

    #[must_use]
    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join("rejected")
    }

    #[must_use]
    pub fn rejected_candidate(&self, frame: u32, attempt: u32) -> PathBuf {
        self.rejected_dir()
            .join(format!("frame_{}_try_{attempt}.png", frame_index_str(frame)))
    }

    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    #[must_use]
    pub fn frame_metrics(&self, frame: u32) -> PathBuf {
        self.audit_dir()
            .join(format!("frame_{}_metrics.json", frame_index_str(frame)))
    }

    #[must_use]
    pub fn audit_log(&self) -> PathBuf {
        self.audit_dir().join("audit_log.jsonl")
    }

    #[must_use]
    pub fn export_staging_dir(&self, move_name: &str) -> PathBuf {
        self.root.join("export_staging").join(move_name)
    }

    /// Staged frame name; lexicographic order equals numeric order by the
    /// zero padding.
    #[must_use]
    pub fn staged_frame(&self, move_name: &str, frame: u32) -> PathBuf {
        self.export_staging_dir(move_name)
            .join(format!("{move_name}_{}.png", frame_index_str(frame)))
    }

    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.root.join("export")
    }

    #[must_use]
    pub fn atlas_json(&self, canonical_name: &str) -> PathBuf {
        self.export_dir().join(format!("{canonical_name}.json"))
    }

    #[must_use]
    pub fn atlas_sheet(&self, canonical_name: &str, sheet: u32) -> PathBuf {
        self.export_dir()
            .join(format!("{canonical_name}-{sheet}.png"))
    }

    #[must_use]
    pub fn frame_mapping(&self) -> PathBuf {
        self.export_dir().join("frame_mapping.json")
    }

    /// Captured packer stdout/stderr/exit status.
    #[must_use]
    pub fn packer_log(&self) -> PathBuf {
        self.export_dir().join("texturepacker.json")
    }

    #[must_use]
    pub fn diagnostic(&self) -> PathBuf {
        self.root.join("diagnostic.json")
    }

    #[must_use]
    pub fn summary(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    /// Create the run folder and its fixed subdirectories.
    pub fn ensure_layout(&self) -> Result<(), CoreError> {
        for dir in [
            self.root.clone(),
            self.candidates_dir(),
            self.approved_dir(),
            self.rejected_dir(),
            self.audit_dir(),
            self.export_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
