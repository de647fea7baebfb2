//! The orchestrator state machine.
//!
//! Drives a run through INIT → (GENERATING → AUDITING → RETRY_DECIDING /
//! APPROVING → NEXT_FRAME)* → COMPLETED | STOPPED, persisting state
//! atomically after every transition. Frames are processed strictly in
//! order; attempt k+1 of a frame starts only after attempt k's record is
//! durable on disk.
//!
//! The orchestrator is the only mutator of [`RunState`]. The auditor and
//! ladder receive read-only views and return verdicts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use spriteforge_audit::anchor::{AnchorAnalysis, analyze_anchor_buf};
use spriteforge_audit::auditor::{AuditContext, AuditOutcome, audit};
use spriteforge_audit::frame::FrameBuf;
use spriteforge_core::audit_log::{AuditEvent, AuditLogWriter, EventLevel, EventOutcome};
use spriteforge_core::error::CoreError;
use spriteforge_core::fsio::{self, LockFile};
use spriteforge_core::manifest::{LadderAction, Manifest, MetricId};
use spriteforge_core::state::{AttemptRecord, FrameAccounting, RunState, RunStatus};
use spriteforge_core::{RunPaths, ReasonCode, clock, seed};

use crate::error::PipelineError;
use crate::generator::{Backoff, CandidateResult, GenerationParams, GenerationRequest, Generator, GeneratorError};
use crate::ladder::{LadderInput, RetryLadder};
use crate::prompt::{self, PromptContext};
use crate::stop::{self, DiagnosticReport, StopCause, StopVerdict};

/// Env var holding the generator credential; its value is redacted from all
/// logs.
pub const API_KEY_ENV: &str = "SPRITEFORGE_API_KEY";
/// Env var set by CI to suppress progress decoration.
pub const CI_ENV: &str = "SPRITEFORGE_CI";

/// True when running under CI: progress logging stays plain.
#[must_use]
pub fn ci_mode() -> bool {
    std::env::var(CI_ENV).is_ok_and(|v| !v.is_empty() && v != "0")
}

/// INIT probe for the generator credential. Invoked by
/// [`Orchestrator::run`] for adapters that declare
/// [`Generator::requires_api_credential`]; a missing credential aborts the
/// run with exit code 3.
pub fn probe_generator_credential() -> Result<(), PipelineError> {
    match std::env::var(API_KEY_ENV) {
        Ok(v) if !v.is_empty() => Ok(()),
        _ => Err(PipelineError::MissingDependency {
            code: ReasonCode::DepApiKeyMissing,
            message: format!("{API_KEY_ENV} is not set"),
        }),
    }
}

/// Terminal summary written to `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub manifest_hash: String,
    pub status: RunStatus,
    pub accounting: FrameAccounting,
    pub total_attempts: u32,
    pub retried_frames: u32,
    pub reason_code_histogram: BTreeMap<String, u32>,
    pub duration_ms: u64,
    /// Filled in by the export stage; "pending" until then.
    pub release_status: String,
    pub generated_at: String,
}

/// What a completed (or stopped) run hands back to the host.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: RunState,
    pub diagnostic: Option<DiagnosticReport>,
    pub summary: RunSummary,
}

impl RunOutcome {
    /// Exit code for a run that did not reach export: 0 only when every
    /// frame approved (export still gates release), 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed => 0,
            _ => 1,
        }
    }
}

/// How a frame left the per-frame loop.
enum FrameResolution {
    Approved,
    Failed,
    Aborted,
}

/// The run driver. Collaborators are plain values behind trait objects.
pub struct Orchestrator {
    manifest: Manifest,
    run_id: String,
    manifest_hash: String,
    paths: RunPaths,
    generator: Box<dyn Generator>,
    ladder: RetryLadder,
    backoff: Backoff,
    abort: Arc<AtomicBool>,
    /// Identity (SSIM) score of each approved frame, for the chaining
    /// predicate.
    approved_ssim: BTreeMap<u32, f64>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.run_id)
            .field("manifest_hash", &self.manifest_hash)
            .field("paths", &self.paths)
            .field("ladder", &self.ladder)
            .field("backoff", &self.backoff)
            .field("approved_ssim", &self.approved_ssim)
            .finish()
    }
}

impl Orchestrator {
    /// Build an orchestrator for `manifest` under `runs_root`.
    ///
    /// Validates the manifest (exit-code-2 territory on failure) and
    /// derives the run identity, but touches no files yet.
    pub fn new(
        manifest: Manifest,
        runs_root: impl AsRef<Path>,
        generator: Box<dyn Generator>,
    ) -> Result<Self, PipelineError> {
        manifest.validate().map_err(|err| match err {
            CoreError::InvalidManifest(msg) => PipelineError::InvalidManifest(msg),
            other => PipelineError::Core(other),
        })?;
        let manifest_hash = manifest.canonical_hash().map_err(PipelineError::Core)?;
        let run_id = manifest.canonical_name();
        let paths = RunPaths::new(runs_root, &run_id);
        let ladder = RetryLadder::new(manifest.retry.ladder.clone());
        Ok(Self {
            manifest,
            run_id,
            manifest_hash,
            paths,
            generator,
            ladder,
            backoff: Backoff::default(),
            abort: Arc::new(AtomicBool::new(false)),
            approved_ssim: BTreeMap::new(),
        })
    }

    /// Override the retry backoff (tests use tight timings).
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handle for SIGINT/SIGTERM wiring: setting the flag lets the current
    /// in-flight attempt finish, then halts at the next safe boundary.
    #[must_use]
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    #[must_use]
    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Execute the run to a terminal state.
    pub fn run(&mut self) -> Result<RunOutcome, PipelineError> {
        let started = Instant::now();
        // Dependency probes come before any filesystem work: a missing
        // credential is exit-code-3 territory, not a half-created run.
        if self.generator.requires_api_credential() {
            probe_generator_credential()?;
        }
        self.paths.ensure_layout().map_err(PipelineError::Core)?;
        let lock = LockFile::acquire(self.paths.lock()).map_err(PipelineError::Core)?;

        let secrets: Vec<String> = std::env::var(API_KEY_ENV).ok().into_iter().collect();
        let log = Arc::new(
            AuditLogWriter::open(self.paths.audit_log(), secrets).map_err(PipelineError::Core)?,
        );

        let result = self.run_inner(&log, started);
        // The lock is released on every path, including errors.
        if let Err(err) = lock.release() {
            log::warn!("failed to release run lock: {err}");
        }
        result
    }

    fn run_inner(
        &mut self,
        log: &Arc<AuditLogWriter>,
        started: Instant,
    ) -> Result<RunOutcome, PipelineError> {
        // INIT: snapshot the manifest, analyze the anchor, load or create
        // state.
        fsio::write_json_atomic(&self.paths.manifest_snapshot(), &self.manifest)
            .map_err(PipelineError::Core)?;

        let anchor_raw = FrameBuf::load_png(Path::new(&self.manifest.inputs.anchor_path))?;
        let anchor_analysis =
            analyze_anchor_buf(&anchor_raw, self.manifest.canvas.alignment.root_zone_ratio)?;
        fsio::write_json_atomic(&self.paths.anchor_analysis(), &anchor_analysis)
            .map_err(PipelineError::Core)?;
        let target = self.manifest.canvas.target_size;
        let anchor_frame = if anchor_raw.width() == target && anchor_raw.height() == target {
            anchor_raw
        } else {
            anchor_raw.resample_nearest(target)
        };

        let mut state = self.load_or_init_state()?;
        state.set_status(RunStatus::Running);
        self.persist(&state)?;
        self.emit(
            log,
            AuditEvent::new(&self.run_id, EventLevel::Info, "run_started")
                .with_detail(serde_json::json!({
                    "manifest_hash": self.manifest_hash,
                    "frames": state.frame_count(),
                    "resuming_from": state.next_pending_frame(),
                })),
        );

        // Frame loop.
        let mut stop_verdict: Option<StopVerdict> = None;
        while let Some(frame_index) = state.next_pending_frame() {
            if self.abort.load(Ordering::SeqCst) {
                stop_verdict = Some(StopVerdict {
                    cause: StopCause::Aborted,
                    detail: "abort requested".into(),
                });
                break;
            }
            if !ci_mode() {
                log::info!(
                    "frame {frame_index}/{}: generating",
                    state.frame_count().saturating_sub(1)
                );
            }

            let resolution =
                self.process_frame(frame_index, &mut state, &anchor_analysis, &anchor_frame, log)?;
            if matches!(resolution, FrameResolution::Aborted) {
                stop_verdict = Some(StopVerdict {
                    cause: StopCause::Aborted,
                    detail: "abort requested".into(),
                });
                break;
            }

            if let Some(verdict) =
                stop::evaluate(&state, &self.manifest.retry.stop_conditions)
            {
                self.emit(
                    log,
                    AuditEvent::new(&self.run_id, EventLevel::Error, "stop_condition")
                        .with_outcome(EventOutcome::Fail)
                        .with_detail(serde_json::to_value(&verdict).unwrap_or_default()),
                );
                stop_verdict = Some(verdict);
                break;
            }
        }

        // Terminal state.
        let accounting = state.accounting();
        let status = if stop_verdict.is_some() {
            RunStatus::Stopped
        } else if accounting.approved == state.frame_count() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        state.set_status(status);
        self.persist(&state)?;

        let diagnostic = if let Some(verdict) = &stop_verdict {
            let report = stop::build_diagnostic(&state, verdict);
            fsio::write_json_atomic(&self.paths.diagnostic(), &report)
                .map_err(PipelineError::Core)?;
            Some(report)
        } else {
            None
        };

        let summary = self.build_summary(&state, started.elapsed().as_millis() as u64);
        fsio::write_json_atomic(&self.paths.summary(), &summary).map_err(PipelineError::Core)?;
        self.emit(
            log,
            AuditEvent::new(&self.run_id, EventLevel::Info, "run_finished")
                .with_outcome(match status {
                    RunStatus::Completed => EventOutcome::Pass,
                    _ => EventOutcome::Fail,
                })
                .with_detail(serde_json::json!({"status": status})),
        );

        Ok(RunOutcome {
            status,
            state,
            diagnostic,
            summary,
        })
    }

    /// Drive one frame to approval, failure, or an abort boundary.
    fn process_frame(
        &mut self,
        frame_index: u32,
        state: &mut RunState,
        anchor_analysis: &AnchorAnalysis,
        anchor_frame: &FrameBuf,
        log: &Arc<AuditLogWriter>,
    ) -> Result<FrameResolution, PipelineError> {
        // Chaining context is fixed for the whole frame: the predecessor's
        // approval does not change mid-frame.
        let previous = self.previous_frame_info(state, frame_index);
        let previous_buf = match &previous {
            Some((path, _)) => Some(FrameBuf::load_png(Path::new(path))?),
            None => None,
        };
        let prev_drifted = previous
            .as_ref()
            .is_some_and(|(_, sf01)| *sf01 < self.manifest.retry.drift_floor);

        let mut action: Option<LadderAction> = None;
        let mut identity_drifted = state.frame_attempts[frame_index as usize]
            .iter()
            .any(|a| a.reason_codes.contains(&ReasonCode::Sf01IdentityDrift));

        // Resume mid-frame: re-derive the retry decision that was pending
        // when the previous process halted, so the continuation is
        // semantically the run that never stopped.
        if !state.frame_attempts[frame_index as usize].is_empty() {
            let drift_exclusions = if prev_drifted {
                self.trailing_non_reanchor_attempts(state, frame_index)
            } else {
                0
            };
            let history = &state.frame_attempts[frame_index as usize];
            let last = history.last().expect("checked non-empty");
            let decision = self.ladder.decide(&LadderInput {
                history,
                latest_codes: &last.reason_codes,
                latest_score: last.score,
                consecutive_drift_exclusions: drift_exclusions,
            });
            if decision.action == LadderAction::Stop {
                state
                    .fail_frame(frame_index, decision.rationale.clone())
                    .map_err(PipelineError::Core)?;
                self.persist(state)?;
                return Ok(FrameResolution::Failed);
            }
            action = Some(decision.action);
        }

        loop {
            let attempt_index = state.frames[frame_index as usize].attempts;
            let attempt_started = Instant::now();

            // Assemble the prompt and reference stack.
            let previous_for_prompt = previous
                .as_ref()
                .map(|(path, sf01)| (Path::new(path.as_str()), *sf01));
            let resolved = prompt::resolve(&PromptContext {
                manifest: &self.manifest,
                frame_index,
                action,
                identity_drifted,
                previous: previous_for_prompt,
            });
            let attempt_seed = seed::attempt_seed(&self.run_id, frame_index, attempt_index);
            let output_path = self.paths.candidate(frame_index, attempt_index);
            let request = GenerationRequest {
                run_id: self.run_id.clone(),
                frame_index,
                attempt_index,
                seed: attempt_seed,
                prompt: resolved.text.clone(),
                negative_prompt: resolved.negative.clone(),
                reference_stack: resolved.reference_stack.clone(),
                params: GenerationParams::from_config(
                    &self.manifest.generator,
                    self.manifest.canvas.generation_size,
                ),
                output_path: output_path.clone(),
            };
            self.emit(
                log,
                AuditEvent::new(&self.run_id, EventLevel::Info, "generation_started")
                    .with_frame(frame_index)
                    .with_attempt(attempt_index)
                    .with_strategy(&resolved.strategy),
            );

            // GENERATING. Retryable errors back off without consuming the
            // attempt; terminal errors consume it and fail the frame.
            let candidate = match self.generate_with_backoff(&request, log) {
                Ok(candidate) => candidate,
                Err(err) => {
                    let code = err.reason_code();
                    let record = AttemptRecord {
                        attempt_number: attempt_index,
                        seed: attempt_seed,
                        prompt_hash: resolved.hash(),
                        reason_codes: vec![code],
                        score: 0.0,
                        strategy: resolved.strategy.clone(),
                        timestamp: clock::now_utc(),
                        duration_ms: attempt_started.elapsed().as_millis() as u64,
                    };
                    state
                        .record_attempt(frame_index, record)
                        .map_err(PipelineError::Core)?;
                    state
                        .fail_frame(frame_index, format!("{code}: {err}"))
                        .map_err(PipelineError::Core)?;
                    self.persist(state)?;
                    self.emit(
                        log,
                        AuditEvent::new(&self.run_id, EventLevel::Error, "generation_failed")
                            .with_frame(frame_index)
                            .with_attempt(attempt_index)
                            .with_codes(&[code])
                            .with_outcome(EventOutcome::Error),
                    );
                    return Ok(FrameResolution::Failed);
                }
            };
            state.set_last_candidate(frame_index, candidate.image_path.display().to_string());

            // AUDITING.
            let work_dir = self.paths.candidates_dir();
            let ctx = AuditContext {
                manifest: &self.manifest,
                anchor: anchor_analysis,
                anchor_frame,
                previous_frame: previous_buf.as_ref(),
                work_dir: &work_dir,
            };
            let report = audit(&candidate.image_path, frame_index, &ctx)?;
            fsio::write_json_atomic(&self.paths.frame_metrics(frame_index), &report)
                .map_err(PipelineError::Core)?;

            let record = AttemptRecord {
                attempt_number: attempt_index,
                seed: attempt_seed,
                prompt_hash: resolved.hash(),
                reason_codes: report.reason_codes.clone(),
                score: report.composite_score,
                strategy: resolved.strategy.clone(),
                timestamp: clock::now_utc(),
                duration_ms: attempt_started.elapsed().as_millis() as u64,
            };
            state
                .record_attempt(frame_index, record)
                .map_err(PipelineError::Core)?;
            self.persist(state)?;
            self.emit(
                log,
                AuditEvent::new(&self.run_id, EventLevel::Info, "audit_verdict")
                    .with_frame(frame_index)
                    .with_attempt(attempt_index)
                    .with_codes(&report.reason_codes)
                    .with_score(report.composite_score)
                    .with_outcome(if report.passed() {
                        EventOutcome::Pass
                    } else {
                        EventOutcome::Fail
                    })
                    .with_artifacts(vec![candidate.image_path.display().to_string()]),
            );

            if matches!(report.outcome(), AuditOutcome::Pass { .. }) {
                // APPROVING: the normalized frame is the canonical
                // artifact; once copied it is immutable.
                let normalized = report
                    .normalized_path
                    .as_ref()
                    .expect("passing audits always carry a normalized path");
                let approved_path = self.paths.approved_frame(frame_index);
                std::fs::copy(normalized, &approved_path)?;
                state
                    .approve_frame(frame_index, approved_path.display().to_string())
                    .map_err(PipelineError::Core)?;
                self.persist(state)?;

                let ssim = report
                    .metrics
                    .iter()
                    .find(|e| e.id == MetricId::Ssim)
                    .map_or(1.0, |e| e.result.score);
                self.approved_ssim.insert(frame_index, ssim);
                self.emit(
                    log,
                    AuditEvent::new(&self.run_id, EventLevel::Info, "frame_approved")
                        .with_frame(frame_index)
                        .with_attempt(attempt_index)
                        .with_score(report.composite_score)
                        .with_outcome(EventOutcome::Pass)
                        .with_artifacts(vec![approved_path.display().to_string()]),
                );
                return Ok(FrameResolution::Approved);
            }

            // Soft or hard failure.
            if report.reason_codes.contains(&ReasonCode::Sf01IdentityDrift) {
                identity_drifted = true;
            }
            if self.manifest.retry.keep_rejected {
                let rejected = self.paths.rejected_candidate(frame_index, attempt_index);
                if let Some(parent) = rejected.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if let Err(err) = std::fs::copy(&candidate.image_path, &rejected) {
                    log::warn!("could not preserve rejected candidate: {err}");
                }
            }

            // RETRY_DECIDING.
            let drift_exclusions = if prev_drifted {
                self.trailing_non_reanchor_attempts(state, frame_index)
            } else {
                0
            };
            let history = &state.frame_attempts[frame_index as usize];
            let decision = self.ladder.decide(&LadderInput {
                history,
                latest_codes: &report.reason_codes,
                latest_score: report.composite_score,
                consecutive_drift_exclusions: drift_exclusions,
            });
            self.emit(
                log,
                AuditEvent::new(&self.run_id, EventLevel::Warn, "retry_decision")
                    .with_frame(frame_index)
                    .with_attempt(attempt_index)
                    .with_strategy(decision.action.as_str())
                    .with_detail(serde_json::json!({"rationale": decision.rationale})),
            );

            if decision.action == LadderAction::Stop {
                if let Some(code) = decision.synthesized {
                    // The collapse code joins the final attempt's record so
                    // diagnostics rank it.
                    if let Some(last) = state.frame_attempts[frame_index as usize].last_mut() {
                        last.reason_codes.push(code);
                    }
                    state
                        .fail_frame(frame_index, code.message())
                        .map_err(PipelineError::Core)?;
                } else {
                    state
                        .fail_frame(frame_index, decision.rationale.clone())
                        .map_err(PipelineError::Core)?;
                }
                self.persist(state)?;
                return Ok(FrameResolution::Failed);
            }

            action = Some(decision.action);
            // Abort boundary: the finished attempt is persisted; no new
            // attempt starts.
            if self.abort.load(Ordering::SeqCst) {
                return Ok(FrameResolution::Aborted);
            }
        }
    }

    /// Approved predecessor path + identity score, when chaining applies.
    fn previous_frame_info(&self, state: &RunState, frame_index: u32) -> Option<(String, f64)> {
        if frame_index == 0 {
            return None;
        }
        let prev = &state.frames[(frame_index - 1) as usize];
        let path = prev.approved_path.clone()?;
        let sf01 = self
            .approved_ssim
            .get(&(frame_index - 1))
            .copied()
            .or_else(|| self.read_persisted_ssim(frame_index - 1))
            .unwrap_or(1.0);
        Some((path, sf01))
    }

    /// Recover a predecessor's identity score from its metrics report after
    /// a resume.
    fn read_persisted_ssim(&self, frame_index: u32) -> Option<f64> {
        let report: spriteforge_audit::auditor::AuditReport =
            fsio::read_json(&self.paths.frame_metrics(frame_index)).ok()?;
        report
            .metrics
            .iter()
            .find(|e| e.id == MetricId::Ssim)
            .map(|e| e.result.score)
    }

    /// Trailing attempts for this frame that did not already re-anchor.
    fn trailing_non_reanchor_attempts(&self, state: &RunState, frame_index: u32) -> u32 {
        let re_anchor = LadderAction::ReAnchor.as_str();
        state.frame_attempts[frame_index as usize]
            .iter()
            .rev()
            .take_while(|a| a.strategy != re_anchor)
            .count() as u32
    }

    fn generate_with_backoff(
        &self,
        request: &GenerationRequest,
        log: &Arc<AuditLogWriter>,
    ) -> Result<CandidateResult, GeneratorError> {
        let mut retry = 0;
        loop {
            match self.generator.generate_frame(request) {
                Ok(candidate) => return Ok(candidate),
                Err(err) if err.is_retryable() && retry < self.backoff.max_retries => {
                    let delay = self.backoff.delay_ms(retry);
                    self.emit(
                        log,
                        AuditEvent::new(&self.run_id, EventLevel::Warn, "generator_backoff")
                            .with_frame(request.frame_index)
                            .with_attempt(request.attempt_index)
                            .with_codes(&[err.reason_code()])
                            .with_detail(serde_json::json!({"delay_ms": delay, "retry": retry})),
                    );
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Load resumable state or create a fresh one.
    ///
    /// Resume requires a matching manifest hash; approved frames whose
    /// images vanished from disk are demoted to pending rather than
    /// trusted.
    fn load_or_init_state(&self) -> Result<RunState, PipelineError> {
        let path = self.paths.state_json();
        if !path.exists() {
            return Ok(RunState::new(
                &self.run_id,
                &self.manifest_hash,
                self.manifest.identity.frame_count,
            ));
        }
        let mut state: RunState = fsio::read_json(&path).map_err(PipelineError::Core)?;
        if state.manifest_hash != self.manifest_hash {
            return Err(PipelineError::ManifestMismatch {
                run_id: self.run_id.clone(),
                found: state.manifest_hash,
                expected: self.manifest_hash.clone(),
            });
        }
        state.verify_invariants().map_err(PipelineError::Core)?;
        for frame in &mut state.frames {
            if frame.status == spriteforge_core::FrameStatus::Approved {
                let present = frame
                    .approved_path
                    .as_ref()
                    .is_some_and(|p| Path::new(p).exists());
                if !present {
                    log::warn!(
                        "approved image for frame {} missing on disk; regenerating",
                        frame.index
                    );
                    frame.status = spriteforge_core::FrameStatus::Pending;
                    frame.approved_path = None;
                }
            }
        }
        log::info!(
            "resuming run {} at frame {:?}",
            self.run_id,
            state.next_pending_frame()
        );
        Ok(state)
    }

    fn build_summary(&self, state: &RunState, duration_ms: u64) -> RunSummary {
        let mut histogram: BTreeMap<String, u32> = BTreeMap::new();
        for attempts in &state.frame_attempts {
            for attempt in attempts {
                for code in &attempt.reason_codes {
                    *histogram.entry(code.as_str().to_string()).or_insert(0) += 1;
                }
            }
        }
        RunSummary {
            run_id: self.run_id.clone(),
            manifest_hash: self.manifest_hash.clone(),
            status: state.status,
            accounting: state.accounting(),
            total_attempts: state.total_attempts(),
            retried_frames: state.retried_frames(),
            reason_code_histogram: histogram,
            duration_ms,
            release_status: "pending".to_string(),
            generated_at: clock::now_utc(),
        }
    }

    fn persist(&self, state: &RunState) -> Result<(), PipelineError> {
        fsio::write_json_atomic(&self.paths.state_json(), state).map_err(PipelineError::Core)
    }

    fn emit(&self, log: &Arc<AuditLogWriter>, event: AuditEvent) {
        if let Err(err) = log.emit(&event) {
            log::warn!("audit log write failed: {err}");
        }
    }
}
