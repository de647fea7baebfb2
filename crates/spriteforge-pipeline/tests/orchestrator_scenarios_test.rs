//! End-to-end orchestrator scenarios against a scripted mock generator:
//! happy path, identity drift with rescue, identity collapse with stop,
//! retryable generator errors, abort + resume, and configuration rejects.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use spriteforge_audit::frame::FrameBuf;
use spriteforge_core::audit_log::validate_log_file;
use spriteforge_core::manifest::Manifest;
use spriteforge_core::state::{FrameStatus, RunStatus};
use spriteforge_core::{fsio, seed};
use spriteforge_pipeline::{
    Backoff, CandidateResult, GenerationRequest, Generator, GeneratorError, Orchestrator,
};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time after epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// 32x32 anchor: a solid block standing on row 27.
fn anchor_sprite() -> FrameBuf {
    let mut buf = FrameBuf::new(32, 32);
    for y in 18..=27 {
        for x in 10..=21 {
            buf.set_pixel(x, y, [40, 40, 200, 255]);
        }
    }
    buf
}

/// Same palette and baseline as the anchor, different structure: fails SSIM
/// and nothing else.
fn noise_sprite() -> FrameBuf {
    let mut buf = FrameBuf::new(32, 32);
    for y in 4..=27 {
        for x in 4..=27 {
            if (x / 2 + y / 2) % 2 == 0 {
                buf.set_pixel(x, y, [40, 40, 200, 255]);
            }
        }
    }
    buf
}

/// Anchor with two interior pixels snapped to the secondary palette color:
/// passes every metric, but its identity score lands below a drift floor
/// of 0.999.
fn near_anchor_sprite() -> FrameBuf {
    let mut buf = anchor_sprite();
    buf.set_pixel(12, 20, [0, 0, 0, 255]);
    buf.set_pixel(18, 24, [0, 0, 0, 255]);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Good,
    NearAnchor,
    Noise,
    AuthError,
}

#[derive(Default)]
struct SharedScript {
    behaviors: BTreeMap<(u32, u32), Behavior>,
    requests: Mutex<Vec<GenerationRequest>>,
    rate_limit_budget: Mutex<u32>,
    abort_on_frame: Option<u32>,
    abort_flag: Mutex<Option<Arc<AtomicBool>>>,
}

struct ScriptedGenerator {
    shared: Arc<SharedScript>,
}

impl Generator for ScriptedGenerator {
    fn generate_frame(
        &self,
        request: &GenerationRequest,
    ) -> Result<CandidateResult, GeneratorError> {
        self.shared
            .requests
            .lock()
            .unwrap()
            .push(request.clone());

        if self.shared.abort_on_frame == Some(request.frame_index)
            && let Some(flag) = self.shared.abort_flag.lock().unwrap().as_ref()
        {
            flag.store(true, Ordering::SeqCst);
        }

        {
            let mut budget = self.shared.rate_limit_budget.lock().unwrap();
            if *budget > 0 {
                *budget -= 1;
                return Err(GeneratorError::RateLimited);
            }
        }

        let behavior = self
            .shared
            .behaviors
            .get(&(request.frame_index, request.attempt_index))
            .copied()
            .unwrap_or(Behavior::Good);
        let image = match behavior {
            Behavior::Good => anchor_sprite(),
            Behavior::NearAnchor => near_anchor_sprite(),
            Behavior::Noise => noise_sprite(),
            Behavior::AuthError => {
                return Err(GeneratorError::Auth("credential rejected".into()));
            }
        };
        image
            .save_png(&request.output_path)
            .map_err(|err| GeneratorError::Failed(err.to_string()))?;

        Ok(CandidateResult {
            image_path: request.output_path.clone(),
            raw_prompt: request.prompt.clone(),
            generator_params: request.params.clone(),
            attempt_id: format!("mock-{}-{}", request.frame_index, request.attempt_index),
            seed: request.seed,
            duration_ms: 1,
            errors: Vec::new(),
        })
    }
}

struct Fixture {
    root: PathBuf,
    manifest: Manifest,
    shared: Arc<SharedScript>,
}

fn fixture(prefix: &str, frame_count: u32, move_name: &str) -> Fixture {
    fixture_with(prefix, frame_count, move_name, serde_json::json!({}))
}

fn fixture_with(
    prefix: &str,
    frame_count: u32,
    move_name: &str,
    retry_overrides: serde_json::Value,
) -> Fixture {
    let root = unique_tmp_dir(prefix);
    let anchor_path = root.join("anchor.png");
    anchor_sprite().save_png(&anchor_path).unwrap();

    let mut retry = serde_json::json!({
        "stop_conditions": {"retry_rate": 0.9, "reject_rate": 0.9, "consecutive_fails": 5}
    });
    merge(&mut retry, &retry_overrides);

    let manifest_value = serde_json::json!({
        "identity": {"character": "blaze", "move": move_name,
                     "frame_count": frame_count, "is_loop": true},
        "inputs": {"anchor_path": anchor_path.display().to_string(),
                   "palette": [[40, 40, 200], [0, 0, 0]]},
        "canvas": {"target_size": 32, "generation_size": 32},
        "auditor": {"file_size_bounds": {"min_bytes": 1}},
        "retry": retry,
        "generator": {
            "model_id": "mock-sprite",
            "prompt_templates": {
                "master": "pixel sprite of {character}, frame {frame} of {frame_count}",
                "variation": "next {move} pose",
                "lock": "EXACT anchor identity",
                "negative": "blur"
            }
        }
    });
    let manifest = Manifest::from_json(&manifest_value.to_string()).unwrap();
    Fixture {
        root,
        manifest,
        shared: Arc::new(SharedScript::default()),
    }
}

fn merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    if let (Some(base_map), Some(overlay_map)) = (base.as_object_mut(), overlay.as_object()) {
        for (k, v) in overlay_map {
            match base_map.get_mut(k) {
                Some(slot) if slot.is_object() && v.is_object() => merge(slot, v),
                _ => {
                    base_map.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

fn orchestrator(fixture: &Fixture) -> Orchestrator {
    Orchestrator::new(
        fixture.manifest.clone(),
        fixture.root.join("runs"),
        Box::new(ScriptedGenerator {
            shared: Arc::clone(&fixture.shared),
        }),
    )
    .expect("valid manifest")
    .with_backoff(Backoff {
        base_ms: 1,
        max_retries: 4,
    })
}

#[test]
fn happy_path_idle_approves_every_frame_first_try() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fx = fixture("orch-happy", 4, "idle");
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.exit_code(), 0);
    let acc = outcome.state.accounting();
    assert_eq!((acc.approved, acc.failed, acc.pending), (4, 0, 0));

    for frame in 0..4u32 {
        let fs = &outcome.state.frames[frame as usize];
        assert_eq!(fs.status, FrameStatus::Approved);
        assert_eq!(fs.attempts, 1);
        // Seeds are content-addressed, not random.
        assert_eq!(
            outcome.state.frame_attempts[frame as usize][0].seed,
            seed::attempt_seed("blaze_idle", frame, 0)
        );
        // The approved image is canonical: target size, visible pixels.
        let approved = FrameBuf::load_png(Path::new(
            fs.approved_path.as_ref().expect("approved path"),
        ))
        .unwrap();
        assert_eq!((approved.width(), approved.height()), (32, 32));
        assert!(approved.count_opaque() > 0);
    }

    // Persisted artifacts: state, summary, schema-clean audit log.
    let paths = orch.paths();
    let state: spriteforge_core::RunState = fsio::read_json(&paths.state_json()).unwrap();
    state.verify_invariants().unwrap();
    assert!(paths.summary().exists());
    let (lines, errors) = validate_log_file(&paths.audit_log()).unwrap();
    assert!(lines > 0);
    assert!(errors.is_empty(), "log schema violations: {errors:?}");
    assert!(!paths.diagnostic().exists());
}

#[test]
fn identity_drift_recovers_through_rescue_ladder() {
    let mut fx = fixture("orch-rescue", 4, "idle");
    {
        let shared = Arc::get_mut(&mut fx.shared).unwrap();
        shared.behaviors.insert((2, 0), Behavior::Noise);
        shared.behaviors.insert((2, 1), Behavior::Noise);
    }
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let frame2 = &outcome.state.frames[2];
    assert_eq!(frame2.status, FrameStatus::Approved);
    assert_eq!(frame2.attempts, 3);

    let attempts = &outcome.state.frame_attempts[2];
    let strategies: Vec<&str> = attempts.iter().map(|a| a.strategy.as_str()).collect();
    assert_eq!(strategies, ["default", "identity_rescue", "identity_rescue"]);
    for (k, attempt) in attempts.iter().enumerate() {
        assert_eq!(attempt.seed, seed::attempt_seed("blaze_idle", 2, k as u32));
    }
    assert!(
        attempts[0]
            .reason_codes
            .iter()
            .any(|c| c.as_str() == "SF01_IDENTITY_DRIFT")
    );
    assert!(attempts[2].reason_codes.is_empty());
}

#[test]
fn identity_collapse_fails_frame_and_stops_run() {
    let mut fx = fixture_with(
        "orch-collapse",
        4,
        "idle",
        serde_json::json!({
            "drift_floor": 0.999,
            "stop_conditions": {"consecutive_fails": 1}
        }),
    );
    {
        let shared = Arc::get_mut(&mut fx.shared).unwrap();
        // Frame 2 approves with its identity score under the 0.999 floor,
        // so frame 3's attempts run without the previous-frame reference.
        shared.behaviors.insert((2, 0), Behavior::NearAnchor);
        for attempt in 0..5 {
            shared.behaviors.insert((3, attempt), Behavior::Noise);
        }
    }
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.exit_code(), 1);
    let frame3 = &outcome.state.frames[3];
    assert_eq!(frame3.status, FrameStatus::Failed);
    assert_eq!(frame3.attempts, 4);

    let attempts = &outcome.state.frame_attempts[3];
    let strategies: Vec<&str> = attempts.iter().map(|a| a.strategy.as_str()).collect();
    assert_eq!(
        &strategies[2..],
        ["re_anchor", "re_anchor"],
        "re-anchor forced twice before the collapse verdict"
    );
    assert!(
        attempts
            .last()
            .unwrap()
            .reason_codes
            .iter()
            .any(|c| c.as_str() == "HF_IDENTITY_COLLAPSE")
    );

    // diagnostic.json names the collapse first and suggests a fix.
    let diagnostic = outcome.diagnostic.expect("stopped runs carry diagnostics");
    assert_eq!(diagnostic.top_failure_codes[0].code, "HF_IDENTITY_COLLAPSE");
    assert!(
        diagnostic.recovery_suggestions[0]
            .suggestion
            .contains("anchor contrast")
    );
    assert!(orch.paths().diagnostic().exists());
    // Approved frames survive the stop.
    assert_eq!(outcome.state.accounting().approved, 3);
}

#[test]
fn retryable_generator_errors_do_not_consume_attempts() {
    let mut fx = fixture("orch-backoff", 1, "idle");
    {
        let shared = Arc::get_mut(&mut fx.shared).unwrap();
        *shared.rate_limit_budget.lock().unwrap() = 2;
    }
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.frames[0].attempts, 1);
    // Two rate-limited calls plus the success all hit the generator.
    assert_eq!(fx.shared.requests.lock().unwrap().len(), 3);
}

#[test]
fn non_retryable_generator_error_consumes_attempt_and_fails_frame() {
    let mut fx = fixture_with(
        "orch-auth",
        2,
        "idle",
        serde_json::json!({"stop_conditions": {"reject_rate": 0.1}}),
    );
    {
        let shared = Arc::get_mut(&mut fx.shared).unwrap();
        shared.behaviors.insert((0, 0), Behavior::AuthError);
    }
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Stopped);
    let frame0 = &outcome.state.frames[0];
    assert_eq!(frame0.status, FrameStatus::Failed);
    assert_eq!(frame0.attempts, 1);
    assert!(
        outcome.state.frame_attempts[0][0]
            .reason_codes
            .iter()
            .any(|c| c.as_str() == "SYS_GENERATOR")
    );
}

#[test]
fn abort_preserves_progress_and_resume_continues_attempt_numbering() {
    let mut fx = fixture("orch-resume", 8, "idle");
    {
        let shared = Arc::get_mut(&mut fx.shared).unwrap();
        shared.behaviors.insert((5, 0), Behavior::Noise);
        shared.abort_on_frame = Some(5);
    }
    let mut orch = orchestrator(&fx);
    *fx.shared.abort_flag.lock().unwrap() = Some(orch.abort_handle());
    let outcome = orch.run().unwrap();

    // The in-flight attempt finished and was persisted; no new attempt ran.
    assert_eq!(outcome.status, RunStatus::Stopped);
    let acc = outcome.state.accounting();
    assert_eq!((acc.approved, acc.failed, acc.pending), (5, 0, 3));
    assert_eq!(outcome.state.current_frame, 5);
    assert_eq!(outcome.state.frames[5].attempts, 1);

    // Resume with the same manifest: approved frames are skipped and the
    // frame 5 attempt counter continues where it left off.
    let resumed_shared = Arc::new(SharedScript::default());
    let mut resumed = Orchestrator::new(
        fx.manifest.clone(),
        fx.root.join("runs"),
        Box::new(ScriptedGenerator {
            shared: Arc::clone(&resumed_shared),
        }),
    )
    .unwrap();
    let outcome = resumed.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.accounting().approved, 8);
    let requests = resumed_shared.requests.lock().unwrap();
    assert_eq!(requests[0].frame_index, 5);
    assert_eq!(requests[0].attempt_index, 1);
    assert_eq!(
        requests[0].seed,
        seed::attempt_seed("blaze_idle", 5, 1)
    );
    assert!(requests.iter().all(|r| r.frame_index >= 5));
    // Frame 5 carries both attempts in its history.
    assert_eq!(outcome.state.frames[5].attempts, 2);
}

#[test]
fn temperature_below_floor_is_never_sent() {
    let mut fx = fixture("orch-temp", 2, "idle");
    fx.manifest.generator.temperature = 0.25;
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let requests = fx.shared.requests.lock().unwrap();
    assert!(!requests.is_empty());
    assert!(
        requests
            .iter()
            .all(|r| r.params.temperature >= 1.0)
    );
}

#[test]
fn single_frame_run_reduces_to_anchor_only_path() {
    let fx = fixture("orch-single", 1, "idle");
    let mut orch = orchestrator(&fx);
    let outcome = orch.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.accounting().approved, 1);
    // No previous frame existed, so the reference stack held the anchor
    // alone.
    let requests = fx.shared.requests.lock().unwrap();
    assert_eq!(requests[0].reference_stack.len(), 1);
    assert!(requests[0].reference_stack[0].label.contains("MASTER ANCHOR"));
}

#[test]
fn palette_empty_manifest_rejected_before_any_io() {
    let fx = fixture("orch-badmanifest", 2, "idle");
    let mut manifest = fx.manifest.clone();
    manifest.inputs.palette.clear();
    let err = Orchestrator::new(
        manifest,
        fx.root.join("runs"),
        Box::new(ScriptedGenerator {
            shared: Arc::new(SharedScript::default()),
        }),
    )
    .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

/// Remote-model stand-in: declares the credential requirement without ever
/// being reached.
struct RemoteGenerator;

impl Generator for RemoteGenerator {
    fn generate_frame(
        &self,
        _request: &GenerationRequest,
    ) -> Result<CandidateResult, GeneratorError> {
        Err(GeneratorError::Unavailable(
            "remote generator should never be reached without a credential".into(),
        ))
    }

    fn requires_api_credential(&self) -> bool {
        true
    }
}

#[test]
fn missing_api_credential_aborts_init_with_exit_code_3() {
    // SPRITEFORGE_API_KEY is never set by this suite; the probe must fire
    // before the run folder is even created.
    let fx = fixture("orch-nocred", 2, "idle");
    let mut orch = Orchestrator::new(
        fx.manifest.clone(),
        fx.root.join("runs"),
        Box::new(RemoteGenerator),
    )
    .unwrap();
    let err = orch.run().unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("SPRITEFORGE_API_KEY"));
    assert!(!fx.root.join("runs/blaze_idle/state.json").exists());
}

#[test]
fn resume_with_different_manifest_is_refused() {
    let fx = fixture("orch-mismatch", 1, "idle");
    let mut orch = orchestrator(&fx);
    orch.run().unwrap();

    let mut altered = fx.manifest.clone();
    altered.identity.frame_count = 3;
    let mut second = Orchestrator::new(
        altered,
        fx.root.join("runs"),
        Box::new(ScriptedGenerator {
            shared: Arc::new(SharedScript::default()),
        }),
    )
    .unwrap();
    let err = second.run().unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
