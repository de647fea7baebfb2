//! Retry ladder.
//!
//! Maps the reason codes of a failed attempt to the next corrective action.
//! Rules are evaluated in priority order over the frame's attempt history;
//! the ladder also owns the two safety valves:
//! - collapse detection: two consecutive failed re-anchor attempts
//!   synthesize `HF_IDENTITY_COLLAPSE` and stop the frame
//! - oscillation detection: alternating failure signatures over the last
//!   four attempts skip one rung instead of repeating themselves

use spriteforge_core::manifest::{LadderAction, LadderConfig};
use spriteforge_core::reason::{CodeFamily, ReasonCode};
use spriteforge_core::state::AttemptRecord;

/// Everything the ladder looks at for one decision.
#[derive(Debug, Clone, Copy)]
pub struct LadderInput<'a> {
    /// All attempts recorded for this frame, latest last.
    pub history: &'a [AttemptRecord],
    /// Reason codes of the latest (failed) attempt.
    pub latest_codes: &'a [ReasonCode],
    /// Composite score of the latest attempt.
    pub latest_score: f64,
    /// Consecutive trailing attempts that wanted previous-frame chaining
    /// but had it excluded because the previous frame's identity score sat
    /// below the drift floor, and still failed. Two of these force a clean
    /// re-anchor.
    pub consecutive_drift_exclusions: u32,
}

/// The ladder's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderDecision {
    pub action: LadderAction,
    /// Code synthesized alongside a STOP (identity collapse).
    pub synthesized: Option<ReasonCode>,
    /// Human-readable rationale for the audit log.
    pub rationale: String,
}

/// Stateless decision engine configured from the manifest.
#[derive(Debug, Clone)]
pub struct RetryLadder {
    config: LadderConfig,
}

/// Ladder rungs in escalation order (STOP excluded; it is a verdict, not a
/// rung to skip to).
const RUNGS: [LadderAction; 7] = [
    LadderAction::RerollSeed,
    LadderAction::TightenNegative,
    LadderAction::IdentityRescue,
    LadderAction::PoseRescue,
    LadderAction::TwoStageInpaint,
    LadderAction::PostProcess,
    LadderAction::ReAnchor,
];

impl RetryLadder {
    #[must_use]
    pub fn new(config: LadderConfig) -> Self {
        Self { config }
    }

    /// Decide the next action for a frame whose latest attempt failed.
    #[must_use]
    pub fn decide(&self, input: &LadderInput<'_>) -> LadderDecision {
        let attempts = input.history.len() as u32;

        // Collapse: re-anchoring twice in a row did not recover identity.
        if self.trailing_re_anchor_failures(input.history) >= 2 {
            return LadderDecision {
                action: LadderAction::Stop,
                synthesized: Some(ReasonCode::HfIdentityCollapse),
                rationale: "re-anchor failed twice consecutively".into(),
            };
        }

        // Attempt cap.
        if attempts >= self.config.max_attempts_per_frame {
            return LadderDecision {
                action: LadderAction::Stop,
                synthesized: None,
                rationale: format!(
                    "attempt cap {} reached",
                    self.config.max_attempts_per_frame
                ),
            };
        }

        // A failed re-anchor gets exactly one more shot before collapse.
        if self.trailing_re_anchor_failures(input.history) == 1
            && self.enabled(LadderAction::ReAnchor)
        {
            return LadderDecision {
                action: LadderAction::ReAnchor,
                synthesized: None,
                rationale: "re-anchor retry before collapse verdict".into(),
            };
        }

        // The previous frame drifted and two attempts failed without its
        // guidance: force the anchor as sole reference.
        if input.consecutive_drift_exclusions >= 2 && self.enabled(LadderAction::ReAnchor) {
            return LadderDecision {
                action: LadderAction::ReAnchor,
                synthesized: None,
                rationale: "two consecutive drift exclusions".into(),
            };
        }

        let mut action = self.walk_rungs(input);
        if oscillating(input.history) {
            let skipped = self.next_enabled_above(action).unwrap_or(action);
            if skipped != action {
                log::debug!(
                    "oscillation detected; skipping {} for {}",
                    action.as_str(),
                    skipped.as_str()
                );
                action = skipped;
            }
        }

        LadderDecision {
            action,
            synthesized: None,
            rationale: format!("matched rung {}", action.as_str()),
        }
    }

    /// The priority-ordered reason→action walk; first match wins.
    fn walk_rungs(&self, input: &LadderInput<'_>) -> LadderAction {
        let latest = input.latest_codes;
        let seen_before = |code: ReasonCode| {
            input
                .history
                .iter()
                .rev()
                .skip(1)
                .any(|a| a.reason_codes.contains(&code))
        };
        let recurring =
            |code: ReasonCode| latest.contains(&code) && seen_before(code);

        // Level 1: a fresh fault signature gets a plain seed reroll.
        let any_fresh_soft = latest.iter().any(|code| {
            code.family() == CodeFamily::Soft && !seen_before(*code)
        });
        if any_fresh_soft && self.enabled(LadderAction::RerollSeed) {
            return LadderAction::RerollSeed;
        }

        // Level 2: recurring palette / halo / noise faults tighten the
        // negative prompt.
        if (recurring(ReasonCode::Sf02PaletteDrift)
            || recurring(ReasonCode::Sf03AlphaHalo)
            || recurring(ReasonCode::Sf05PixelNoise))
            && self.enabled(LadderAction::TightenNegative)
        {
            return LadderAction::TightenNegative;
        }

        // Level 3: persistent identity drift locks the prompt to the anchor.
        if recurring(ReasonCode::Sf01IdentityDrift)
            && self.enabled(LadderAction::IdentityRescue)
        {
            return LadderAction::IdentityRescue;
        }

        // Level 4: recurring baseline/pose faults re-invoke with an
        // explicit pose spec.
        if recurring(ReasonCode::Sf04BaselineDrift) && self.enabled(LadderAction::PoseRescue) {
            return LadderAction::PoseRescue;
        }

        // Level 5: identity/palette faults on an otherwise-close frame are
        // localized; inpaint the offending region.
        if (latest.contains(&ReasonCode::Sf01IdentityDrift)
            || latest.contains(&ReasonCode::Sf02PaletteDrift))
            && input.latest_score >= 0.75
            && self.enabled(LadderAction::TwoStageInpaint)
        {
            return LadderAction::TwoStageInpaint;
        }

        // Level 6: small palette/halo faults are fixable without the model.
        if (latest.contains(&ReasonCode::Sf02PaletteDrift)
            || latest.contains(&ReasonCode::Sf03AlphaHalo))
            && input.latest_score >= 0.85
            && self.enabled(LadderAction::PostProcess)
        {
            return LadderAction::PostProcess;
        }

        // Default: reroll (composite-only failures, hard faults, or every
        // configured rung disabled).
        if self.enabled(LadderAction::RerollSeed) {
            LadderAction::RerollSeed
        } else {
            *RUNGS
                .iter()
                .find(|a| self.enabled(**a))
                .unwrap_or(&LadderAction::Stop)
        }
    }

    fn enabled(&self, action: LadderAction) -> bool {
        self.config.actions_enabled.contains(&action)
    }

    fn next_enabled_above(&self, action: LadderAction) -> Option<LadderAction> {
        let position = RUNGS.iter().position(|a| *a == action)?;
        RUNGS[position + 1..]
            .iter()
            .find(|a| self.enabled(**a))
            .copied()
    }

    /// Trailing failed attempts whose strategy was re_anchor.
    fn trailing_re_anchor_failures(&self, history: &[AttemptRecord]) -> u32 {
        let re_anchor = LadderAction::ReAnchor.as_str();
        history
            .iter()
            .rev()
            .take_while(|a| a.strategy == re_anchor)
            .count() as u32
    }
}

/// True when the last four attempts alternate between two distinct failure
/// signatures (A, B, A, B): repeating the same fix would keep trading one
/// fault for the other.
fn oscillating(history: &[AttemptRecord]) -> bool {
    if history.len() < 4 {
        return false;
    }
    let tail = &history[history.len() - 4..];
    let sig = |a: &AttemptRecord| {
        let mut codes: Vec<&str> = a.reason_codes.iter().map(|c| c.as_str()).collect();
        codes.sort_unstable();
        codes.join(",")
    };
    let (s0, s1, s2, s3) = (sig(&tail[0]), sig(&tail[1]), sig(&tail[2]), sig(&tail[3]));
    s0 == s2 && s1 == s3 && s0 != s1
}
