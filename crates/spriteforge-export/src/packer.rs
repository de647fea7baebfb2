//! Atlas packer invocation.
//!
//! The packer is an external binary driven with a locked flag set: those
//! flags are what make the output load cleanly in the target engine, and
//! no operator configuration may override them. Operator flags are merged
//! only when their switch is on the allow list; everything else is
//! rejected with a warning.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use spriteforge_core::ReasonCode;

use crate::error::ExportError;

/// Env var overriding the packer executable location.
pub const PACKER_ENV: &str = "SPRITEFORGE_PACKER";
/// Default executable name searched on PATH.
const DEFAULT_PACKER: &str = "TexturePacker";

/// Locked flags, applied to every invocation. Non-negotiable: the engine
/// smoke tests assume exactly this trim/extrude/padding behavior.
pub const LOCKED_FLAGS: [&str; 13] = [
    "--format",
    "phaser",
    "--trim-mode",
    "Trim",
    "--extrude",
    "1",
    "--shape-padding",
    "2",
    "--border-padding",
    "2",
    "--disable-rotation",
    "--alpha-handling",
    "ReduceBorderArtifacts",
];

/// Flags always appended after the locked set.
pub const LOCKED_TAIL_FLAGS: [&str; 2] = ["--trim-sprite-names", "--prepend-folder-name"];

/// Operator-suppliable switches.
pub const ALLOWED_CUSTOM_FLAGS: [&str; 6] = [
    "--max-size",
    "--multipack",
    "--scale",
    "--size-constraints",
    "--algorithm",
    "--pack-mode",
];

/// One packer invocation.
#[derive(Debug, Clone)]
pub struct PackRequest {
    /// Folder of staged frames; its name becomes the frame-key prefix.
    pub staging_dir: PathBuf,
    /// Output data file `{base}.json`.
    pub data_path: PathBuf,
    /// Output sheet pattern `{base}-{n}.png`.
    pub sheet_pattern: PathBuf,
    /// Operator flags from the manifest (filtered through the allow list).
    pub custom_flags: Vec<String>,
}

/// Captured subprocess output, persisted to `texturepacker.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackCapture {
    pub command_line: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl PackCapture {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// The external atlas packer, as the export pipeline sees it.
pub trait Packer {
    fn pack_atlas(&self, request: &PackRequest) -> Result<PackCapture, ExportError>;

    /// Dependency check run at the top of the export stage; a failure
    /// aborts with exit code 3 before anything is staged. In-process
    /// stand-ins keep the default.
    fn probe(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Split operator flags into (accepted, rejected) against the allow list.
///
/// A flag and its value travel together: a rejected switch drags its value
/// along, and a value following an accepted switch is accepted.
#[must_use]
pub fn merge_custom_flags(custom: &[String]) -> (Vec<String>, Vec<String>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    let mut accepting_value = false;
    for flag in custom {
        if flag.starts_with("--") {
            let switch = flag.split('=').next().unwrap_or(flag);
            if ALLOWED_CUSTOM_FLAGS.contains(&switch) {
                accepted.push(flag.clone());
                accepting_value = !flag.contains('=');
            } else {
                log::warn!("rejecting packer flag outside the allow list: {flag}");
                rejected.push(flag.clone());
                accepting_value = false;
            }
        } else if accepting_value {
            accepted.push(flag.clone());
            accepting_value = false;
        } else {
            rejected.push(flag.clone());
        }
    }
    (accepted, rejected)
}

/// Build the full argv (after the executable) for an invocation.
///
/// Multipack is on by default; an operator `--multipack` passes the allow
/// list anyway, so the default only fills the gap.
#[must_use]
pub fn build_arguments(request: &PackRequest) -> Vec<String> {
    let (accepted, _) = merge_custom_flags(&request.custom_flags);
    let mut args: Vec<String> = LOCKED_FLAGS.iter().map(|s| (*s).to_string()).collect();
    args.extend(LOCKED_TAIL_FLAGS.iter().map(|s| (*s).to_string()));
    if !accepted.iter().any(|f| f.starts_with("--multipack")) {
        args.push("--multipack".to_string());
    }
    args.extend(accepted);
    args.push("--data".to_string());
    args.push(request.data_path.display().to_string());
    args.push("--sheet".to_string());
    args.push(request.sheet_pattern.display().to_string());
    args.push(request.staging_dir.display().to_string());
    args
}

/// Subprocess-backed packer.
pub struct CommandPacker {
    executable: PathBuf,
}

impl CommandPacker {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Locate the packer: env override first, then PATH.
    pub fn discover() -> Result<Self, ExportError> {
        if let Ok(path) = std::env::var(PACKER_ENV)
            && !path.is_empty()
        {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Self::new(path));
            }
            return Err(ExportError::MissingDependency {
                code: ReasonCode::DepPackerMissing,
                message: format!("{PACKER_ENV} points at a missing file: {}", path.display()),
            });
        }
        let path_var = std::env::var("PATH").unwrap_or_default();
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(DEFAULT_PACKER);
            if candidate.exists() {
                return Ok(Self::new(candidate));
            }
        }
        Err(ExportError::MissingDependency {
            code: ReasonCode::DepPackerMissing,
            message: format!("{DEFAULT_PACKER} not found on PATH and {PACKER_ENV} unset"),
        })
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Packer for CommandPacker {
    /// The executable can vanish between discovery and export (PATH edits,
    /// container rebuilds); re-verify it at export time.
    fn probe(&self) -> Result<(), ExportError> {
        if self.executable.exists() {
            return Ok(());
        }
        Err(ExportError::MissingDependency {
            code: ReasonCode::DepPackerMissing,
            message: format!("packer executable missing: {}", self.executable.display()),
        })
    }

    fn pack_atlas(&self, request: &PackRequest) -> Result<PackCapture, ExportError> {
        let args = build_arguments(request);
        let output = Command::new(&self.executable)
            .args(&args)
            .output()
            .map_err(|err| {
                ExportError::PackerSpawn(format!("{}: {err}", self.executable.display()))
            })?;
        let capture = PackCapture {
            command_line: std::iter::once(self.executable.display().to_string())
                .chain(args)
                .collect(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !capture.ok() {
            log::error!(
                "packer exited with {}: {}",
                capture.exit_code,
                capture.stderr.trim()
            );
        }
        Ok(capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(custom: &[&str]) -> PackRequest {
        PackRequest {
            staging_dir: PathBuf::from("/run/export_staging/idle"),
            data_path: PathBuf::from("/run/export/blaze_idle.json"),
            sheet_pattern: PathBuf::from("/run/export/blaze_idle-{n}.png"),
            custom_flags: custom.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn locked_flags_always_present() {
        let args = build_arguments(&request(&[]));
        for flag in ["--format", "phaser", "--disable-rotation", "--extrude"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(args.contains(&"--multipack".to_string()));
        // Staging dir is the trailing positional argument.
        assert_eq!(args.last().unwrap(), "/run/export_staging/idle");
    }

    #[test]
    fn allowed_custom_flags_merge_with_values() {
        let args = build_arguments(&request(&["--max-size", "2048", "--algorithm", "MaxRects"]));
        let max_pos = args.iter().position(|a| a == "--max-size").unwrap();
        assert_eq!(args[max_pos + 1], "2048");
        assert!(args.contains(&"MaxRects".to_string()));
    }

    #[test]
    fn disallowed_flags_rejected_with_their_values() {
        let (accepted, rejected) = merge_custom_flags(&[
            "--trim-mode".to_string(),
            "None".to_string(),
            "--scale".to_string(),
            "2".to_string(),
        ]);
        assert_eq!(rejected, vec!["--trim-mode", "None"]);
        assert_eq!(accepted, vec!["--scale", "2"]);
        // The locked trim mode survives regardless.
        let args = build_arguments(&request(&["--trim-mode", "None"]));
        let trim_positions: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "--trim-mode")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(trim_positions.len(), 1);
        assert_eq!(args[trim_positions[0] + 1], "Trim");
    }

    #[test]
    fn explicit_multipack_not_duplicated() {
        let args = build_arguments(&request(&["--multipack"]));
        assert_eq!(args.iter().filter(|a| *a == "--multipack").count(), 1);
    }

    #[test]
    fn equals_style_flags_accepted() {
        let (accepted, rejected) = merge_custom_flags(&["--max-size=4096".to_string()]);
        assert_eq!(accepted, vec!["--max-size=4096"]);
        assert!(rejected.is_empty());
    }

    #[test]
    fn discover_failure_is_a_dependency_error() {
        // Succeeds only on machines with a real TexturePacker install; the
        // failure mapping is the contract under test.
        if let Err(err) = CommandPacker::discover() {
            assert_eq!(err.exit_code(), 3);
            match err {
                ExportError::MissingDependency { code, .. } => {
                    assert_eq!(code, ReasonCode::DepPackerMissing);
                }
                other => panic!("expected MissingDependency, got {other}"),
            }
        }
    }

    #[test]
    fn probe_reports_missing_executable_as_dependency() {
        let packer = CommandPacker::new("/nonexistent/TexturePacker");
        let err = packer.probe().unwrap_err();
        assert_eq!(err.exit_code(), 3);
        match err {
            ExportError::MissingDependency { code, .. } => {
                assert_eq!(code, ReasonCode::DepPackerMissing);
            }
            other => panic!("expected MissingDependency, got {other}"),
        }
    }
}
