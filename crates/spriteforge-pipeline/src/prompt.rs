//! Semantic-interleaving prompt assembly.
//!
//! The reference stack is a flat ordered list of `[label, image]` pairs:
//! the anchor first, the previous frame second (only when it held identity),
//! then an explicit hierarchy sentence telling the model the anchor wins any
//! conflict. The resolved text template depends on the retry strategy in
//! effect; the negative block rides along and can be tightened by the
//! ladder.

use std::path::{Path, PathBuf};

use spriteforge_core::manifest::{LadderAction, Manifest};

use crate::generator::ReferenceImage;

/// Label for the anchor slot.
const ANCHOR_LABEL: &str = "[IMAGE 1]: MASTER ANCHOR (IDENTITY TRUTH)";
/// Label for the previous-frame slot.
const PREVIOUS_LABEL: &str = "[IMAGE 2]: PREVIOUS FRAME (POSE REFERENCE)";
/// Hierarchy sentence emitted whenever the previous frame is present.
const HIERARCHY_NOTE: &str = "HIERARCHY: If [IMAGE 2] conflicts with [IMAGE 1], [IMAGE 1] wins.";

/// Extra negative block appended by TIGHTEN_NEGATIVE.
const TIGHTENED_NEGATIVE: &str =
    "no off-palette colors, no soft edges, no semi-transparent halo, no stray pixels";

/// A fully resolved prompt for one attempt.
#[derive(Debug, Clone)]
pub struct ResolvedPrompt {
    pub text: String,
    pub negative: String,
    pub reference_stack: Vec<ReferenceImage>,
    /// Strategy wire name recorded on the attempt ("default" when no rescue
    /// template is in effect).
    pub strategy: String,
}

impl ResolvedPrompt {
    /// Blake3 hex over everything the model sees, in presentation order.
    /// Identical inputs yield identical hashes across runs.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for reference in &self.reference_stack {
            hasher.update(reference.label.as_bytes());
            hasher.update(b"\n");
            hasher.update(reference.path.to_string_lossy().as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(self.text.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.negative.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Inputs for one attempt's prompt resolution.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub manifest: &'a Manifest,
    pub frame_index: u32,
    /// Ladder action driving this attempt, `None` for the first attempt.
    pub action: Option<LadderAction>,
    /// True once SF01 has been observed on this frame: the template locks
    /// to strict consistency even on a plain seed reroll.
    pub identity_drifted: bool,
    /// Previous approved frame, with its identity (SSIM) score.
    pub previous: Option<(&'a Path, f64)>,
}

/// Assemble the reference stack and resolve the prompt text for an attempt.
#[must_use]
pub fn resolve(ctx: &PromptContext<'_>) -> ResolvedPrompt {
    let manifest = ctx.manifest;
    let templates = &manifest.generator.prompt_templates;
    let re_anchor = ctx.action == Some(LadderAction::ReAnchor);

    // Reference stack: anchor, then the previous frame only if it exists,
    // kept identity, and the ladder is not forcing a clean re-anchor.
    let mut stack = vec![ReferenceImage {
        label: ANCHOR_LABEL.to_string(),
        path: PathBuf::from(&manifest.inputs.anchor_path),
    }];
    let chain_previous = !re_anchor
        && ctx
            .previous
            .is_some_and(|(_, sf01)| sf01 >= manifest.retry.drift_floor);
    if chain_previous {
        let (path, _) = ctx.previous.expect("checked above");
        stack.push(ReferenceImage {
            label: PREVIOUS_LABEL.to_string(),
            path: path.to_path_buf(),
        });
    }
    if ctx.action == Some(LadderAction::PoseRescue) {
        for pose in &manifest.inputs.pose_refs {
            stack.push(ReferenceImage {
                label: format!("[IMAGE {}]: POSE SPEC", stack.len() + 1),
                path: PathBuf::from(pose),
            });
        }
    }

    // Template selection: strict-consistency lock once identity drifted or
    // a rescue is in effect; per-frame variation otherwise; master for the
    // anchor-adjacent first frame.
    let locked = ctx.identity_drifted
        || re_anchor
        || matches!(
            ctx.action,
            Some(LadderAction::IdentityRescue | LadderAction::TwoStageInpaint)
        );
    let template = if locked {
        non_empty_or(&templates.lock, &templates.master)
    } else if ctx.frame_index == 0 {
        &templates.master
    } else {
        non_empty_or(&templates.variation, &templates.master)
    };

    let mut text = String::new();
    if chain_previous {
        text.push_str(HIERARCHY_NOTE);
        text.push('\n');
    }
    text.push_str(&substitute(template, manifest, ctx.frame_index));

    let mut negative = templates.negative.clone();
    if ctx.action == Some(LadderAction::TightenNegative) {
        if !negative.is_empty() {
            negative.push_str(", ");
        }
        negative.push_str(TIGHTENED_NEGATIVE);
    }

    let strategy = strategy_name(ctx.action, ctx.identity_drifted);

    ResolvedPrompt {
        text,
        negative,
        reference_stack: stack,
        strategy,
    }
}

/// Strategy wire name recorded in attempt records: the template mode in
/// effect, not the mechanical knob. A seed reroll under identity drift is
/// already running the strict-consistency template.
#[must_use]
pub fn strategy_name(action: Option<LadderAction>, identity_drifted: bool) -> String {
    match action {
        None => "default".to_string(),
        Some(LadderAction::RerollSeed) => {
            if identity_drifted {
                LadderAction::IdentityRescue.as_str().to_string()
            } else {
                "default".to_string()
            }
        }
        Some(action) => action.as_str().to_string(),
    }
}

fn non_empty_or<'a>(preferred: &'a String, fallback: &'a String) -> &'a String {
    if preferred.is_empty() { fallback } else { preferred }
}

fn substitute(template: &str, manifest: &Manifest, frame_index: u32) -> String {
    template
        .replace("{character}", &manifest.identity.character)
        .replace("{move}", &manifest.identity.move_name)
        .replace("{frame}", &frame_index.to_string())
        .replace("{frame_count}", &manifest.identity.frame_count.to_string())
}
