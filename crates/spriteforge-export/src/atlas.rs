//! Atlas JSON model and post-export validation.
//!
//! Accepts both the single-pack shape (`frames{}` + `meta.image`) and the
//! multipack shape (`textures[]`), normalizing both into a list of sheets.
//! Validation cross-checks the JSON against the PNGs actually on disk and
//! against the manifest's frame count and key contract.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spriteforge_audit::frame::FrameBuf;
use spriteforge_core::Manifest;

use crate::error::ExportError;

/// `{x, y, w, h}` rectangle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Size {
    pub w: i64,
    pub h: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One frame entry in the atlas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasFrame {
    pub frame: Rect,
    #[serde(default)]
    pub rotated: bool,
    #[serde(default)]
    pub trimmed: bool,
    #[serde(rename = "spriteSourceSize")]
    pub sprite_source_size: Rect,
    #[serde(rename = "sourceSize")]
    pub source_size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot: Option<Point>,
}

/// One multipack texture entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasTexture {
    pub image: String,
    pub size: Size,
    pub frames: BTreeMap<String, AtlasFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<serde_json::Value>,
}

/// The emitted atlas document, either shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<BTreeMap<String, AtlasFrame>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textures: Option<Vec<AtlasTexture>>,
    pub meta: AtlasMeta,
}

/// A normalized sheet view over both shapes.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub image: String,
    pub size: Option<Size>,
    pub frames: BTreeMap<String, AtlasFrame>,
}

impl AtlasDocument {
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Flatten single-pack and multipack into a uniform sheet list.
    #[must_use]
    pub fn sheets(&self) -> Vec<Sheet> {
        if let Some(textures) = &self.textures {
            return textures
                .iter()
                .map(|t| Sheet {
                    image: t.image.clone(),
                    size: Some(t.size),
                    frames: t.frames.clone(),
                })
                .collect();
        }
        if let Some(frames) = &self.frames {
            return vec![Sheet {
                image: self.meta.image.clone().unwrap_or_default(),
                size: self.meta.size,
                frames: frames.clone(),
            }];
        }
        Vec::new()
    }

    /// Total frame count across all sheets.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.sheets().iter().map(|s| s.frames.len()).sum()
    }
}

/// Paths of the finished atlas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasPaths {
    pub canonical_name: String,
    pub json: PathBuf,
    pub sheets: Vec<PathBuf>,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

/// Post-export validation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    #[must_use]
    pub fn clean() -> Self {
        Self {
            ok: true,
            issues: Vec::new(),
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.ok = false;
        self.issues.push(issue);
    }

    pub fn sort_deterministically(&mut self) {
        self.issues.sort_by(|a, b| {
            a.code
                .cmp(&b.code)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.message.cmp(&b.message))
        });
    }
}

/// `^{move}/\d{4}$`, with no file extension.
#[must_use]
pub fn frame_key_matches(key: &str, move_name: &str) -> bool {
    let Some(rest) = key
        .strip_prefix(move_name)
        .and_then(|r| r.strip_prefix('/'))
    else {
        return false;
    };
    rest.len() == 4 && rest.chars().all(|c| c.is_ascii_digit())
}

/// Validate the emitted atlas against the manifest and the sheets on disk.
pub fn post_validate(
    atlas_json: &Path,
    export_dir: &Path,
    manifest: &Manifest,
) -> Result<ValidationReport, ExportError> {
    let mut report = ValidationReport::clean();
    let move_name = &manifest.identity.move_name;

    let document = match AtlasDocument::from_path(atlas_json) {
        Ok(doc) => doc,
        Err(err) => {
            report.push(ValidationIssue {
                code: "atlas.parse".into(),
                message: format!("atlas JSON unreadable: {err}"),
                path: Some(atlas_json.display().to_string()),
                remediation_hint: Some("inspect texturepacker.json for packer output".into()),
            });
            return Ok(report);
        }
    };

    let sheets = document.sheets();
    if sheets.is_empty() {
        report.push(ValidationIssue {
            code: "atlas.structure".into(),
            message: "atlas carries neither frames{} nor textures[]".into(),
            path: Some(atlas_json.display().to_string()),
            remediation_hint: Some("re-run the packer; the output is malformed".into()),
        });
        return Ok(report);
    }

    let total = document.frame_count();
    if total as u32 != manifest.identity.frame_count {
        report.push(ValidationIssue {
            code: "atlas.frame_count".into(),
            message: format!(
                "atlas holds {total} frames, manifest expects {}",
                manifest.identity.frame_count
            ),
            path: None,
            remediation_hint: Some("check staging for missing or stray frames".into()),
        });
    }

    for sheet in &sheets {
        for key in sheet.frames.keys() {
            if !frame_key_matches(key, move_name) {
                report.push(ValidationIssue {
                    code: "atlas.frame_key".into(),
                    message: format!("frame key '{key}' does not match {move_name}/NNNN"),
                    path: None,
                    remediation_hint: Some(
                        "verify --trim-sprite-names and --prepend-folder-name were in effect"
                            .into(),
                    ),
                });
            }
        }

        let sheet_path = export_dir.join(&sheet.image);
        let decoded = match FrameBuf::load_png(&sheet_path) {
            Ok(buf) => buf,
            Err(err) => {
                report.push(ValidationIssue {
                    code: "sheet.decode".into(),
                    message: format!("sheet does not decode: {err}"),
                    path: Some(sheet_path.display().to_string()),
                    remediation_hint: Some("re-run the packer".into()),
                });
                continue;
            }
        };
        let (sheet_w, sheet_h) = (i64::from(decoded.width()), i64::from(decoded.height()));

        if let Some(declared) = sheet.size
            && (declared.w != sheet_w || declared.h != sheet_h)
        {
            report.push(ValidationIssue {
                code: "sheet.size".into(),
                message: format!(
                    "declared {}x{} but PNG is {sheet_w}x{sheet_h}",
                    declared.w, declared.h
                ),
                path: Some(sheet_path.display().to_string()),
                remediation_hint: None,
            });
        }

        for (key, frame) in &sheet.frames {
            let r = frame.frame;
            let inside = r.x >= 0
                && r.y >= 0
                && r.w > 0
                && r.h > 0
                && r.x + r.w <= sheet_w
                && r.y + r.h <= sheet_h;
            if !inside {
                report.push(ValidationIssue {
                    code: "frame.rect".into(),
                    message: format!(
                        "frame '{key}' rect ({},{} {}x{}) escapes its {sheet_w}x{sheet_h} sheet",
                        r.x, r.y, r.w, r.h
                    ),
                    path: Some(sheet_path.display().to_string()),
                    remediation_hint: None,
                });
            }
        }
    }

    report.sort_deterministically();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_key_contract() {
        assert!(frame_key_matches("idle/0000", "idle"));
        assert!(frame_key_matches("run_cycle/0042", "run_cycle"));
        assert!(!frame_key_matches("idle/000", "idle"));
        assert!(!frame_key_matches("idle/0000.png", "idle"));
        assert!(!frame_key_matches("walk/0000", "idle"));
        assert!(!frame_key_matches("idle_0000", "idle"));
    }

    fn frame_at(x: i64, y: i64, size: i64) -> AtlasFrame {
        AtlasFrame {
            frame: Rect { x, y, w: size, h: size },
            rotated: false,
            trimmed: true,
            sprite_source_size: Rect { x: 0, y: 0, w: size, h: size },
            source_size: Size { w: size, h: size },
            pivot: Some(Point { x: 0.5, y: 1.0 }),
        }
    }

    #[test]
    fn single_pack_and_multipack_normalize_identically() {
        let mut frames = BTreeMap::new();
        frames.insert("idle/0000".to_string(), frame_at(0, 0, 16));
        let single = AtlasDocument {
            frames: Some(frames.clone()),
            textures: None,
            meta: AtlasMeta {
                image: Some("a.png".into()),
                size: Some(Size { w: 64, h: 64 }),
                scale: None,
            },
        };
        let multi = AtlasDocument {
            frames: None,
            textures: Some(vec![AtlasTexture {
                image: "a.png".into(),
                size: Size { w: 64, h: 64 },
                frames,
            }]),
            meta: AtlasMeta {
                image: None,
                size: None,
                scale: None,
            },
        };
        assert_eq!(single.frame_count(), 1);
        assert_eq!(multi.frame_count(), 1);
        assert_eq!(single.sheets()[0].image, multi.sheets()[0].image);
    }

    #[test]
    fn atlas_document_round_trips_phaser_shape() {
        let json = r#"{
            "textures": [{
                "image": "blaze_idle-0.png",
                "size": {"w": 128, "h": 64},
                "frames": {
                    "idle/0000": {
                        "frame": {"x": 2, "y": 2, "w": 28, "h": 30},
                        "rotated": false,
                        "trimmed": true,
                        "spriteSourceSize": {"x": 1, "y": 2, "w": 28, "h": 30},
                        "sourceSize": {"w": 32, "h": 32},
                        "pivot": {"x": 0.5, "y": 1.0}
                    }
                }
            }],
            "meta": {"scale": "1"}
        }"#;
        let doc: AtlasDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.frame_count(), 1);
        let sheet = &doc.sheets()[0];
        assert_eq!(sheet.image, "blaze_idle-0.png");
        let frame = &sheet.frames["idle/0000"];
        assert!(frame.trimmed);
        assert!((frame.pivot.unwrap().y - 1.0).abs() < 1e-9);
    }
}
