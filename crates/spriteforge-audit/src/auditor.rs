//! The auditor: Normalize → Hard Gates → Metrics → Aggregate.
//!
//! Produces an [`AuditReport`] per candidate. The auditor never touches run
//! state; the orchestrator owns persistence and retry decisions and
//! dispatches on the [`AuditOutcome`] tag, not on code strings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spriteforge_core::ReasonCode;
use spriteforge_core::manifest::{Manifest, MetricId};

use crate::anchor::AnchorAnalysis;
use crate::error::AuditError;
use crate::frame::FrameBuf;
use crate::gates::{self, GateReport};
use crate::metrics::aggregate::{self, CompositeOutcome};
use crate::metrics::{MetricResult, alpha, baseline, mapd, orphan, palette, ssim};
use crate::normalize::{NormalizeReport, normalize_frame};

/// Read-only context handed to each audit.
#[derive(Debug, Clone, Copy)]
pub struct AuditContext<'a> {
    pub manifest: &'a Manifest,
    pub anchor: &'a AnchorAnalysis,
    /// Anchor resampled to target size; SSIM and baseline measure against it.
    pub anchor_frame: &'a FrameBuf,
    /// Previous approved frame (target size), when one exists.
    pub previous_frame: Option<&'a FrameBuf>,
    /// Where normalized outputs are written.
    pub work_dir: &'a Path,
}

/// Verdict of an audit as a sum type the ladder dispatches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditOutcome {
    Pass { score: f64 },
    SoftFail { codes: Vec<ReasonCode>, score: f64 },
    HardFail { code: ReasonCode },
}

/// Advice attached to the report for log readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Approve,
    Retry,
    Reject,
}

/// One metric's contribution to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub id: MetricId,
    pub result: MetricResult,
    /// Effective weight × score; zero for excluded metrics.
    pub weighted_contribution: f64,
    /// Soft-fail code triggered by this metric, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    /// False when the metric excluded itself from the composite.
    pub counted: bool,
}

/// The full audit verdict for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub frame_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeReport>,
    pub gates: GateReport,
    pub metrics: Vec<MetricEntry>,
    pub composite_score: f64,
    pub reason_codes: Vec<ReasonCode>,
    pub recommended_action: RecommendedAction,
}

impl AuditReport {
    /// Collapse the report into the three-way outcome.
    #[must_use]
    pub fn outcome(&self) -> AuditOutcome {
        if let Some(code) = self.gates.failed {
            return AuditOutcome::HardFail { code };
        }
        if self.recommended_action == RecommendedAction::Approve {
            AuditOutcome::Pass {
                score: self.composite_score,
            }
        } else {
            AuditOutcome::SoftFail {
                codes: self.reason_codes.clone(),
                score: self.composite_score,
            }
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.recommended_action == RecommendedAction::Approve
    }

    fn hard_fail(frame_index: u32, code: ReasonCode, gates: GateReport) -> Self {
        Self {
            frame_index,
            normalized_path: None,
            normalize: None,
            gates,
            metrics: Vec::new(),
            composite_score: 0.0,
            reason_codes: vec![code],
            recommended_action: RecommendedAction::Reject,
        }
    }
}

/// Audit one candidate file.
///
/// Hard failures (including normalization rejects) short-circuit with a
/// score of zero and no metric computation.
pub fn audit(
    candidate_path: &Path,
    frame_index: u32,
    ctx: &AuditContext<'_>,
) -> Result<AuditReport, AuditError> {
    // Normalize. A rejection here maps to a hard code, not an error.
    let normalize_report = match normalize_frame(
        candidate_path,
        &ctx.manifest.canvas,
        ctx.anchor,
        ctx.work_dir,
    ) {
        Ok(report) => report,
        Err(AuditError::Normalize { code, message }) => {
            log::debug!("frame {frame_index}: normalization rejected: {message}");
            return Ok(AuditReport::hard_fail(
                frame_index,
                code,
                GateReport {
                    passed: Vec::new(),
                    failed: Some(code),
                },
            ));
        }
        Err(other) => return Err(other),
    };

    // Hard gates on the normalized output.
    let auditor_cfg = &ctx.manifest.auditor;
    let (gate_report, decoded) = gates::run_hard_gates(
        &normalize_report.output_path,
        ctx.manifest.canvas.target_size,
        auditor_cfg.file_size_bounds,
        &auditor_cfg.hard_gates,
    );
    let Some(frame) = decoded else {
        // No buffer without a recorded failure can only mean HF03 was
        // disabled while the file still failed to decode.
        let code = gate_report.failed.unwrap_or(ReasonCode::Hf03Corrupted);
        return Ok(AuditReport {
            normalized_path: Some(normalize_report.output_path.clone()),
            normalize: Some(normalize_report),
            ..AuditReport::hard_fail(frame_index, code, gate_report)
        });
    };

    // Soft metrics.
    let soft = &auditor_cfg.soft_metrics;
    let thresholds = &soft.thresholds;
    let move_name = &ctx.manifest.identity.move_name;
    let mut entries: Vec<MetricEntry> = Vec::new();

    for id in &soft.enabled {
        let (result, code_on_fail): (MetricResult, Option<ReasonCode>) = match id {
            MetricId::Ssim => (
                ssim::compute(&frame, ctx.anchor_frame, thresholds.ssim),
                Some(ReasonCode::Sf01IdentityDrift),
            ),
            MetricId::Palette => (
                palette::compute(
                    &frame,
                    &ctx.manifest.inputs.palette,
                    thresholds.palette_tolerance,
                    thresholds.palette,
                ),
                Some(ReasonCode::Sf02PaletteDrift),
            ),
            MetricId::Alpha => (
                alpha::compute(&frame, thresholds.alpha_severity),
                Some(ReasonCode::Sf03AlphaHalo),
            ),
            MetricId::Baseline => {
                let anchor_baseline = ctx
                    .anchor_frame
                    .baseline_row()
                    .unwrap_or(ctx.anchor.baseline_row);
                (
                    baseline::compute(&frame, anchor_baseline, thresholds.baseline_drift_px),
                    Some(ReasonCode::Sf04BaselineDrift),
                )
            }
            MetricId::Mapd => (
                mapd::compute(
                    &frame,
                    ctx.previous_frame,
                    move_name,
                    &thresholds.mapd_bypass_moves,
                    &thresholds.mapd_overrides,
                ),
                // Temporal incoherence has no dedicated SF code; a failing
                // MAPD drags the composite instead.
                None,
            ),
            MetricId::Orphan => (
                orphan::compute(&frame, thresholds.orphan_pass, thresholds.orphan_warn),
                Some(ReasonCode::Sf05PixelNoise),
            ),
        };

        let counted = !result.excluded_from_composite();
        let reason_code = if result.passed { None } else { code_on_fail };
        entries.push(MetricEntry {
            id: *id,
            result,
            weighted_contribution: 0.0,
            reason_code,
            counted,
        });
    }

    // Aggregate over counted metrics.
    let counted: Vec<(MetricId, f64)> = entries
        .iter()
        .filter(|e| e.counted)
        .map(|e| (e.id, e.result.score))
        .collect();
    let CompositeOutcome {
        composite,
        should_retry,
        weights_used,
    } = aggregate::compose(&counted, &soft.weights, auditor_cfg.composite_threshold);
    for entry in &mut entries {
        if let Some((_, w)) = weights_used.iter().find(|(id, _)| *id == entry.id) {
            entry.weighted_contribution = w * entry.result.score;
        }
    }

    let reason_codes: Vec<ReasonCode> =
        entries.iter().filter_map(|e| e.reason_code).collect();
    // MAPD has no SF code, so "every metric passed" is checked on its own:
    // a temporal failure must still block approval.
    let all_metrics_passed = entries.iter().all(|e| e.result.passed);
    let recommended_action = if reason_codes.is_empty() && all_metrics_passed && !should_retry {
        RecommendedAction::Approve
    } else {
        RecommendedAction::Retry
    };

    Ok(AuditReport {
        frame_index,
        normalized_path: Some(normalize_report.output_path.clone()),
        normalize: Some(normalize_report),
        gates: gate_report,
        metrics: entries,
        composite_score: composite,
        reason_codes,
        recommended_action,
    })
}
