//! Generator seam.
//!
//! The pipeline never talks to a model directly; it builds a
//! [`GenerationRequest`] and hands it to whatever [`Generator`] value the
//! host provided. Errors are classified retryable (rate limit, timeout,
//! transient network) vs non-retryable (auth, unavailable); retryable
//! failures back off and do not consume a per-frame attempt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use spriteforge_core::ReasonCode;
use spriteforge_core::manifest::GeneratorConfig;

/// Locked sampling parameters. Temperatures below the floor cause mode
/// collapse in sprite generation and are never honored.
pub const TEMPERATURE_FLOOR: f64 = 1.0;
pub const LOCKED_TOP_P: f64 = 0.95;
pub const LOCKED_TOP_K: u32 = 40;

/// One labeled reference image in the stack, in presentation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub label: String,
    pub path: PathBuf,
}

/// Sampling parameters actually sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model_id: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    /// Square output resolution requested from the model.
    pub size: u32,
}

impl GenerationParams {
    /// Build params from the manifest, enforcing the temperature floor.
    /// A request below the floor is clamped up and logged, never honored.
    #[must_use]
    pub fn from_config(config: &GeneratorConfig, size: u32) -> Self {
        let temperature = if config.temperature < TEMPERATURE_FLOOR {
            log::warn!(
                "generator temperature {} refused; clamping to {TEMPERATURE_FLOOR}",
                config.temperature
            );
            TEMPERATURE_FLOOR
        } else {
            config.temperature
        };
        Self {
            model_id: config.model_id.clone(),
            temperature,
            top_p: LOCKED_TOP_P,
            top_k: LOCKED_TOP_K,
            size,
        }
    }
}

/// Everything a generator needs for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub run_id: String,
    pub frame_index: u32,
    pub attempt_index: u32,
    /// Deterministic seed: CRC32(run_id ‖ frame ‖ attempt).
    pub seed: u32,
    /// Fully resolved prompt text, reference labels interleaved.
    pub prompt: String,
    pub negative_prompt: String,
    pub reference_stack: Vec<ReferenceImage>,
    pub params: GenerationParams,
    /// Where the candidate PNG must be written.
    pub output_path: PathBuf,
}

/// What a generator returns for a successful attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub image_path: PathBuf,
    pub raw_prompt: String,
    pub generator_params: GenerationParams,
    pub attempt_id: String,
    pub seed: u32,
    pub duration_ms: u64,
    /// Non-fatal warnings surfaced by the backend.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Generator failure classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    #[error("rate limited")]
    RateLimited,
    #[error("generation timed out")]
    Timeout,
    #[error("network failure: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("generation failed: {0}")]
    Failed(String),
}

impl GeneratorError {
    /// Retryable errors back off without consuming a per-frame attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::Network(_)
        )
    }

    /// System reason code recorded when the error surfaces in state.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Timeout => ReasonCode::SysTimeout,
            Self::Network(_) | Self::RateLimited => ReasonCode::SysNetwork,
            Self::Auth(_) | Self::Unavailable(_) | Self::Failed(_) => ReasonCode::SysGenerator,
        }
    }
}

/// The external image model, as the orchestrator sees it.
pub trait Generator {
    /// Produce one candidate frame at `request.output_path`.
    fn generate_frame(&self, request: &GenerationRequest)
    -> Result<CandidateResult, GeneratorError>;

    /// True when this adapter calls a remote model and needs the API
    /// credential env var. The orchestrator probes the credential at INIT
    /// for such adapters and aborts with a dependency error when it is
    /// missing. In-process stand-ins keep the default.
    fn requires_api_credential(&self) -> bool {
        false
    }
}

/// Bounded exponential backoff for retryable generator errors.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_retries: 4,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based), capped at 30 s.
    #[must_use]
    pub fn delay_ms(&self, retry: u32) -> u64 {
        (self.base_ms.saturating_mul(1 << retry.min(16))).min(30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spriteforge_core::manifest::PromptTemplates;

    fn config(temperature: f64) -> GeneratorConfig {
        GeneratorConfig {
            model_id: "sprite-model-1".into(),
            temperature,
            prompt_templates: PromptTemplates::default(),
        }
    }

    #[test]
    fn low_temperature_clamped_to_floor() {
        let params = GenerationParams::from_config(&config(0.2), 512);
        assert!((params.temperature - TEMPERATURE_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn high_temperature_honored() {
        let params = GenerationParams::from_config(&config(1.3), 512);
        assert!((params.temperature - 1.3).abs() < 1e-9);
        assert!((params.top_p - LOCKED_TOP_P).abs() < 1e-9);
        assert_eq!(params.top_k, LOCKED_TOP_K);
    }

    #[test]
    fn error_classification() {
        assert!(GeneratorError::RateLimited.is_retryable());
        assert!(GeneratorError::Timeout.is_retryable());
        assert!(!GeneratorError::Auth("bad key".into()).is_retryable());
        assert_eq!(
            GeneratorError::Timeout.reason_code(),
            ReasonCode::SysTimeout
        );
        assert_eq!(
            GeneratorError::Unavailable("down".into()).reason_code(),
            ReasonCode::SysGenerator
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_ms(0), 500);
        assert_eq!(backoff.delay_ms(1), 1000);
        assert_eq!(backoff.delay_ms(2), 2000);
        assert_eq!(backoff.delay_ms(20), 30_000);
    }
}
