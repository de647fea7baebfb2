//! Typed manifest model.
//!
//! The manifest is the single input document of a run: identity, anchor and
//! palette inputs, canvas policy, auditor configuration, retry ladder and
//! stop conditions, export and generator settings. It is immutable for the
//! lifetime of a run; its canonical SHA-256 identifies the run for resume.
//!
//! Validation happens once, at INIT. Anything the auditor or exporter would
//! otherwise discover mid-run (an empty palette with palette metrics enabled,
//! a zero canvas) is rejected here with `CoreError::InvalidManifest`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::canon;
use crate::error::CoreError;

/// Character/move identity of the animation being produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub character: String,
    #[serde(rename = "move")]
    pub move_name: String,
    pub frame_count: u32,
    #[serde(default)]
    pub is_loop: bool,
}

/// Input assets: the locked anchor plus optional references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inputs {
    pub anchor_path: String,
    /// Locked palette as RGB triplets. Required when palette metrics run.
    #[serde(default)]
    pub palette: Vec<[u8; 3]>,
    #[serde(default)]
    pub pose_refs: Vec<String>,
    #[serde(default)]
    pub style_refs: Vec<String>,
}

/// Contact-patch alignment policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alignment {
    #[serde(default = "default_alignment_method")]
    pub method: String,
    #[serde(default = "default_true")]
    pub vertical_lock: bool,
    #[serde(default = "default_root_zone_ratio")]
    pub root_zone_ratio: f64,
    /// Horizontal shift clamp in pixels at generation resolution.
    #[serde(default = "default_max_shift_x")]
    pub max_shift_x: u32,
}

fn default_alignment_method() -> String {
    "contact_patch".to_string()
}
fn default_true() -> bool {
    true
}
fn default_root_zone_ratio() -> f64 {
    0.25
}
fn default_max_shift_x() -> u32 {
    8
}

impl Default for Alignment {
    fn default() -> Self {
        Self {
            method: default_alignment_method(),
            vertical_lock: true,
            root_zone_ratio: default_root_zone_ratio(),
            max_shift_x: default_max_shift_x(),
        }
    }
}

/// How background transparency is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransparencyStrategy {
    /// Trust the candidate's own alpha channel.
    TrueAlpha,
    /// Key out pixels near `chroma_color` (auto-selected when absent).
    ChromaKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transparency {
    pub strategy: TransparencyStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chroma_color: Option<[u8; 3]>,
    /// Max per-channel distance for a pixel to count as background.
    #[serde(default = "default_chroma_tolerance")]
    pub chroma_tolerance: u32,
}

fn default_chroma_tolerance() -> u32 {
    24
}

impl Default for Transparency {
    fn default() -> Self {
        Self {
            strategy: TransparencyStrategy::TrueAlpha,
            chroma_color: None,
            chroma_tolerance: default_chroma_tolerance(),
        }
    }
}

/// Canvas sizing and normalization policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canvas {
    pub target_size: u32,
    pub generation_size: u32,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub transparency: Transparency,
}

/// Identifier of a soft metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    Ssim,
    Palette,
    Alpha,
    Baseline,
    Mapd,
    Orphan,
}

/// Weight group a metric contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGroup {
    Identity,
    Palette,
    Stability,
    Style,
}

impl MetricId {
    /// Weight group the metric belongs to when compositing.
    #[must_use]
    pub fn group(self) -> MetricGroup {
        match self {
            Self::Ssim => MetricGroup::Identity,
            Self::Palette => MetricGroup::Palette,
            Self::Baseline | Self::Mapd => MetricGroup::Stability,
            Self::Alpha | Self::Orphan => MetricGroup::Style,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssim => "ssim",
            Self::Palette => "palette",
            Self::Alpha => "alpha",
            Self::Baseline => "baseline",
            Self::Mapd => "mapd",
            Self::Orphan => "orphan",
        }
    }
}

/// Group weights, renormalized at aggregation over the metrics present.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricWeights {
    #[serde(default = "default_w_stability")]
    pub stability: f64,
    #[serde(default = "default_w_identity")]
    pub identity: f64,
    #[serde(default = "default_w_palette")]
    pub palette: f64,
    #[serde(default = "default_w_style")]
    pub style: f64,
}

fn default_w_stability() -> f64 {
    0.35
}
fn default_w_identity() -> f64 {
    0.30
}
fn default_w_palette() -> f64 {
    0.20
}
fn default_w_style() -> f64 {
    0.15
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            stability: default_w_stability(),
            identity: default_w_identity(),
            palette: default_w_palette(),
            style: default_w_style(),
        }
    }
}

impl MetricWeights {
    /// Weight of the group a metric belongs to.
    #[must_use]
    pub fn for_group(&self, group: MetricGroup) -> f64 {
        match group {
            MetricGroup::Identity => self.identity,
            MetricGroup::Palette => self.palette,
            MetricGroup::Stability => self.stability,
            MetricGroup::Style => self.style,
        }
    }
}

/// Per-metric pass thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricThresholds {
    #[serde(default = "default_t_ssim")]
    pub ssim: f64,
    #[serde(default = "default_t_palette")]
    pub palette: f64,
    /// Euclidean RGB distance within which a pixel counts as on-palette.
    #[serde(default = "default_t_palette_tolerance")]
    pub palette_tolerance: f64,
    /// Max (halo + fringe) / edge_pixels severity.
    #[serde(default = "default_t_alpha")]
    pub alpha_severity: f64,
    /// Max |baseline drift| in pixels.
    #[serde(default = "default_t_baseline")]
    pub baseline_drift_px: u32,
    /// Orphan-pixel tiers: at most `orphan_pass` passes clean,
    /// at most `orphan_warn` is a warning, above is a soft fail.
    #[serde(default = "default_t_orphan_pass")]
    pub orphan_pass: u32,
    #[serde(default = "default_t_orphan_warn")]
    pub orphan_warn: u32,
    /// Move-name substrings that bypass MAPD entirely.
    #[serde(default = "default_mapd_bypass")]
    pub mapd_bypass_moves: Vec<String>,
    /// Per-move-type MAPD threshold overrides (exact move-type key).
    #[serde(default)]
    pub mapd_overrides: BTreeMap<String, f64>,
}

fn default_t_ssim() -> f64 {
    0.85
}
fn default_t_palette() -> f64 {
    0.90
}
fn default_t_palette_tolerance() -> f64 {
    30.0
}
fn default_t_alpha() -> f64 {
    0.20
}
fn default_t_baseline() -> u32 {
    4
}
fn default_t_orphan_pass() -> u32 {
    5
}
fn default_t_orphan_warn() -> u32 {
    15
}
fn default_mapd_bypass() -> Vec<String> {
    ["attack", "jump", "hit", "death", "special"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            ssim: default_t_ssim(),
            palette: default_t_palette(),
            palette_tolerance: default_t_palette_tolerance(),
            alpha_severity: default_t_alpha(),
            baseline_drift_px: default_t_baseline(),
            orphan_pass: default_t_orphan_pass(),
            orphan_warn: default_t_orphan_warn(),
            mapd_bypass_moves: default_mapd_bypass(),
            mapd_overrides: BTreeMap::new(),
        }
    }
}

/// Soft-metric selection, weights, and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftMetrics {
    #[serde(default = "default_enabled_metrics")]
    pub enabled: Vec<MetricId>,
    #[serde(default)]
    pub weights: MetricWeights,
    #[serde(default)]
    pub thresholds: MetricThresholds,
}

fn default_enabled_metrics() -> Vec<MetricId> {
    vec![
        MetricId::Ssim,
        MetricId::Palette,
        MetricId::Alpha,
        MetricId::Baseline,
        MetricId::Mapd,
        MetricId::Orphan,
    ]
}

impl Default for SoftMetrics {
    fn default() -> Self {
        Self {
            enabled: default_enabled_metrics(),
            weights: MetricWeights::default(),
            thresholds: MetricThresholds::default(),
        }
    }
}

/// Candidate file-size bounds for HF05.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FileSizeBounds {
    #[serde(default = "default_min_file_size")]
    pub min_bytes: u64,
    #[serde(default = "default_max_file_size")]
    pub max_bytes: u64,
}

fn default_min_file_size() -> u64 {
    128
}
fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}

impl Default for FileSizeBounds {
    fn default() -> Self {
        Self {
            min_bytes: default_min_file_size(),
            max_bytes: default_max_file_size(),
        }
    }
}

/// Auditor configuration: gates on, metrics on, composite threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditorConfig {
    /// Hard-gate wire codes to run (all five by default).
    #[serde(default = "default_hard_gates")]
    pub hard_gates: Vec<String>,
    #[serde(default)]
    pub soft_metrics: SoftMetrics,
    #[serde(default = "default_composite_threshold")]
    pub composite_threshold: f64,
    #[serde(default)]
    pub file_size_bounds: FileSizeBounds,
}

fn default_hard_gates() -> Vec<String> {
    ["HF01", "HF02", "HF03", "HF04", "HF05"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_composite_threshold() -> f64 {
    0.80
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            hard_gates: default_hard_gates(),
            soft_metrics: SoftMetrics::default(),
            composite_threshold: default_composite_threshold(),
            file_size_bounds: FileSizeBounds::default(),
        }
    }
}

/// Retry-ladder action identifiers, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderAction {
    RerollSeed,
    TightenNegative,
    IdentityRescue,
    PoseRescue,
    TwoStageInpaint,
    PostProcess,
    ReAnchor,
    Stop,
}

impl LadderAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RerollSeed => "reroll_seed",
            Self::TightenNegative => "tighten_negative",
            Self::IdentityRescue => "identity_rescue",
            Self::PoseRescue => "pose_rescue",
            Self::TwoStageInpaint => "two_stage_inpaint",
            Self::PostProcess => "post_process",
            Self::ReAnchor => "re_anchor",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for LadderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ladder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default = "default_ladder_actions")]
    pub actions_enabled: Vec<LadderAction>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_frame: u32,
}

fn default_ladder_actions() -> Vec<LadderAction> {
    vec![
        LadderAction::RerollSeed,
        LadderAction::TightenNegative,
        LadderAction::IdentityRescue,
        LadderAction::PoseRescue,
        LadderAction::TwoStageInpaint,
        LadderAction::PostProcess,
        LadderAction::ReAnchor,
        LadderAction::Stop,
    ]
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            actions_enabled: default_ladder_actions(),
            max_attempts_per_frame: default_max_attempts(),
        }
    }
}

/// Run-level stop conditions, evaluated after every frame resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConditions {
    /// Stop when retried_frames / attempted_frames exceeds this.
    #[serde(default = "default_retry_rate")]
    pub retry_rate: f64,
    /// Stop when failed_frames / attempted_frames exceeds this.
    #[serde(default = "default_reject_rate")]
    pub reject_rate: f64,
    /// Stop after this many consecutively failed frames.
    #[serde(default = "default_consecutive_fails")]
    pub consecutive_fails: u32,
    /// Circuit breaker: stop when attempts * per_attempt_cost exceeds this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget: Option<f64>,
    #[serde(default = "default_per_attempt_cost")]
    pub per_attempt_cost: f64,
}

fn default_retry_rate() -> f64 {
    0.5
}
fn default_reject_rate() -> f64 {
    0.3
}
fn default_consecutive_fails() -> u32 {
    2
}
fn default_per_attempt_cost() -> f64 {
    1.0
}

impl Default for StopConditions {
    fn default() -> Self {
        Self {
            retry_rate: default_retry_rate(),
            reject_rate: default_reject_rate(),
            consecutive_fails: default_consecutive_fails(),
            cost_budget: None,
            per_attempt_cost: default_per_attempt_cost(),
        }
    }
}

/// Retry configuration: ladder + stop conditions + chaining policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub stop_conditions: StopConditions,
    /// Previous-frame SF01 score below this excludes it from the
    /// reference stack.
    #[serde(default = "default_drift_floor")]
    pub drift_floor: f64,
    /// Preserve rejected candidates under `rejected/` instead of deleting.
    #[serde(default = "default_true")]
    pub keep_rejected: bool,
}

fn default_drift_floor() -> f64 {
    0.9
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            ladder: LadderConfig::default(),
            stop_conditions: StopConditions::default(),
            drift_floor: default_drift_floor(),
            keep_rejected: true,
        }
    }
}

/// Export configuration. Only custom packer flags live here; the locked
/// flag set is owned by the export crate and cannot be overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub packer_flags: Vec<String>,
    #[serde(default = "default_atlas_format")]
    pub atlas_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Ceiling on total staged bytes (pre-export checklist item).
    #[serde(default = "default_max_staged_bytes")]
    pub max_staged_bytes: u64,
    /// Force export of assets that failed validation (marked debug-only).
    #[serde(default)]
    pub allow_validation_fail: bool,
}

fn default_atlas_format() -> String {
    "phaser".to_string()
}
fn default_max_staged_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            packer_flags: Vec::new(),
            atlas_format: default_atlas_format(),
            output_path: None,
            max_staged_bytes: default_max_staged_bytes(),
            allow_validation_fail: false,
        }
    }
}

/// Prompt templates resolved by the generator adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub master: String,
    #[serde(default)]
    pub variation: String,
    #[serde(default)]
    pub lock: String,
    #[serde(default)]
    pub negative: String,
}

/// Generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub model_id: String,
    /// Requested temperature. Values below 1.0 are clamped up at call time.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub prompt_templates: PromptTemplates,
}

fn default_temperature() -> f64 {
    1.0
}

/// The full manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub identity: Identity,
    pub inputs: Inputs,
    pub canvas: Canvas,
    #[serde(default)]
    pub auditor: AuditorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub export: ExportConfig,
    pub generator: GeneratorConfig,
}

impl Manifest {
    /// Parse a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Canonical `{character}_{move}` name used for run folders and atlases.
    #[must_use]
    pub fn canonical_name(&self) -> String {
        format!(
            "{}_{}",
            self.identity.character.to_lowercase(),
            self.identity.move_name.to_lowercase()
        )
    }

    /// SHA-256 of the canonical (key-sorted) JSON rendering.
    pub fn canonical_hash(&self) -> Result<String, CoreError> {
        let value = serde_json::to_value(self)?;
        Ok(canon::hash_value(&value))
    }

    /// INIT-time validation. Everything caught here is exit-code-2 territory.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |msg: String| Err(CoreError::InvalidManifest(msg));

        if self.identity.character.is_empty() {
            return fail("identity.character must not be empty".into());
        }
        if !is_slug(&self.identity.move_name) {
            return fail(format!(
                "identity.move '{}' must match [a-z0-9_]+ (atlas frame keys depend on it)",
                self.identity.move_name
            ));
        }
        if self.identity.frame_count == 0 {
            return fail("identity.frame_count must be at least 1".into());
        }
        if self.inputs.anchor_path.is_empty() {
            return fail("inputs.anchor_path must not be empty".into());
        }
        if self.canvas.target_size == 0 {
            return fail("canvas.target_size must be positive".into());
        }
        if self.canvas.generation_size < self.canvas.target_size {
            return fail(format!(
                "canvas.generation_size {} is below target_size {}",
                self.canvas.generation_size, self.canvas.target_size
            ));
        }
        if self.canvas.alignment.method != "contact_patch" {
            return fail(format!(
                "canvas.alignment.method '{}' is not supported (expected 'contact_patch')",
                self.canvas.alignment.method
            ));
        }
        let rz = self.canvas.alignment.root_zone_ratio;
        if !(rz > 0.0 && rz <= 1.0) {
            return fail(format!("alignment.root_zone_ratio {rz} must be in (0, 1]"));
        }

        let metrics = &self.auditor.soft_metrics;
        if metrics.enabled.contains(&MetricId::Palette) && self.inputs.palette.is_empty() {
            return fail("palette metric enabled but inputs.palette is empty".into());
        }
        let w = &metrics.weights;
        for (name, value) in [
            ("stability", w.stability),
            ("identity", w.identity),
            ("palette", w.palette),
            ("style", w.style),
        ] {
            if value < 0.0 {
                return fail(format!("soft_metrics.weights.{name} must be non-negative"));
            }
        }
        let ct = self.auditor.composite_threshold;
        if !(0.0..=1.0).contains(&ct) {
            return fail(format!("auditor.composite_threshold {ct} must be in [0, 1]"));
        }
        let bounds = self.auditor.file_size_bounds;
        if bounds.min_bytes >= bounds.max_bytes {
            return fail("auditor.file_size_bounds min must be below max".into());
        }

        if self.retry.ladder.max_attempts_per_frame == 0 {
            return fail("retry.ladder.max_attempts_per_frame must be at least 1".into());
        }
        let stops = &self.retry.stop_conditions;
        for (name, rate) in [
            ("retry_rate", stops.retry_rate),
            ("reject_rate", stops.reject_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return fail(format!("stop_conditions.{name} {rate} must be in [0, 1]"));
            }
        }
        if !(0.0..=1.0).contains(&self.retry.drift_floor) {
            return fail(format!(
                "retry.drift_floor {} must be in [0, 1]",
                self.retry.drift_floor
            ));
        }

        if self.generator.model_id.is_empty() {
            return fail("generator.model_id must not be empty".into());
        }
        if self.generator.temperature < 0.0 {
            return fail("generator.temperature must not be negative".into());
        }
        Ok(())
    }
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
