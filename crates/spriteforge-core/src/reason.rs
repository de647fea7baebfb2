//! Stable reason-code taxonomy.
//!
//! Every audit, retry, and stop decision is explained by one or more codes
//! from this module. The wire strings are frozen: downstream tooling matches
//! on them, and attempt records persist them verbatim.
//!
//! Families:
//! - `HFxx`: hard image faults; the frame is rejected immediately
//! - `SFxx`: soft metric faults driving the retry ladder
//! - `SYS_*`: system faults (generator, network, subprocess)
//! - `DEP_*`: missing external dependency; aborts INIT
//! - `HF_IDENTITY_COLLAPSE`: synthesized by the ladder when re-anchoring
//!   fails repeatedly

use serde::{Deserialize, Serialize};

/// Coarse classification of a reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFamily {
    Hard,
    Soft,
    System,
    Dependency,
}

/// Machine-readable reason code with a frozen wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    #[serde(rename = "HF01_DIMENSION_MISMATCH")]
    Hf01DimensionMismatch,
    #[serde(rename = "HF02_FULLY_TRANSPARENT")]
    Hf02FullyTransparent,
    #[serde(rename = "HF03_CORRUPTED")]
    Hf03Corrupted,
    #[serde(rename = "HF04_WRONG_COLOR_DEPTH")]
    Hf04WrongColorDepth,
    #[serde(rename = "HF05_FILE_SIZE")]
    Hf05FileSize,

    #[serde(rename = "SF01_IDENTITY_DRIFT")]
    Sf01IdentityDrift,
    #[serde(rename = "SF02_PALETTE_DRIFT")]
    Sf02PaletteDrift,
    #[serde(rename = "SF03_ALPHA_HALO")]
    Sf03AlphaHalo,
    #[serde(rename = "SF04_BASELINE_DRIFT")]
    Sf04BaselineDrift,
    #[serde(rename = "SF05_PIXEL_NOISE")]
    Sf05PixelNoise,

    /// Synthesized when RE_ANCHOR was forced twice and the frame still fails.
    #[serde(rename = "HF_IDENTITY_COLLAPSE")]
    HfIdentityCollapse,

    #[serde(rename = "SYS_GENERATOR")]
    SysGenerator,
    #[serde(rename = "SYS_NETWORK")]
    SysNetwork,
    #[serde(rename = "SYS_TIMEOUT")]
    SysTimeout,
    #[serde(rename = "SYS_PACKER")]
    SysPacker,

    #[serde(rename = "DEP_PACKER_MISSING")]
    DepPackerMissing,
    #[serde(rename = "DEP_BROWSER_MISSING")]
    DepBrowserMissing,
    #[serde(rename = "DEP_API_KEY_MISSING")]
    DepApiKeyMissing,
}

impl ReasonCode {
    /// The frozen wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hf01DimensionMismatch => "HF01_DIMENSION_MISMATCH",
            Self::Hf02FullyTransparent => "HF02_FULLY_TRANSPARENT",
            Self::Hf03Corrupted => "HF03_CORRUPTED",
            Self::Hf04WrongColorDepth => "HF04_WRONG_COLOR_DEPTH",
            Self::Hf05FileSize => "HF05_FILE_SIZE",
            Self::Sf01IdentityDrift => "SF01_IDENTITY_DRIFT",
            Self::Sf02PaletteDrift => "SF02_PALETTE_DRIFT",
            Self::Sf03AlphaHalo => "SF03_ALPHA_HALO",
            Self::Sf04BaselineDrift => "SF04_BASELINE_DRIFT",
            Self::Sf05PixelNoise => "SF05_PIXEL_NOISE",
            Self::HfIdentityCollapse => "HF_IDENTITY_COLLAPSE",
            Self::SysGenerator => "SYS_GENERATOR",
            Self::SysNetwork => "SYS_NETWORK",
            Self::SysTimeout => "SYS_TIMEOUT",
            Self::SysPacker => "SYS_PACKER",
            Self::DepPackerMissing => "DEP_PACKER_MISSING",
            Self::DepBrowserMissing => "DEP_BROWSER_MISSING",
            Self::DepApiKeyMissing => "DEP_API_KEY_MISSING",
        }
    }

    /// Parse a wire string back into a code.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "HF01_DIMENSION_MISMATCH" => Self::Hf01DimensionMismatch,
            "HF02_FULLY_TRANSPARENT" => Self::Hf02FullyTransparent,
            "HF03_CORRUPTED" => Self::Hf03Corrupted,
            "HF04_WRONG_COLOR_DEPTH" => Self::Hf04WrongColorDepth,
            "HF05_FILE_SIZE" => Self::Hf05FileSize,
            "SF01_IDENTITY_DRIFT" => Self::Sf01IdentityDrift,
            "SF02_PALETTE_DRIFT" => Self::Sf02PaletteDrift,
            "SF03_ALPHA_HALO" => Self::Sf03AlphaHalo,
            "SF04_BASELINE_DRIFT" => Self::Sf04BaselineDrift,
            "SF05_PIXEL_NOISE" => Self::Sf05PixelNoise,
            "HF_IDENTITY_COLLAPSE" => Self::HfIdentityCollapse,
            "SYS_GENERATOR" => Self::SysGenerator,
            "SYS_NETWORK" => Self::SysNetwork,
            "SYS_TIMEOUT" => Self::SysTimeout,
            "SYS_PACKER" => Self::SysPacker,
            "DEP_PACKER_MISSING" => Self::DepPackerMissing,
            "DEP_BROWSER_MISSING" => Self::DepBrowserMissing,
            "DEP_API_KEY_MISSING" => Self::DepApiKeyMissing,
            _ => return None,
        })
    }

    /// Family classification used for propagation policy.
    #[must_use]
    pub fn family(self) -> CodeFamily {
        match self {
            Self::Hf01DimensionMismatch
            | Self::Hf02FullyTransparent
            | Self::Hf03Corrupted
            | Self::Hf04WrongColorDepth
            | Self::Hf05FileSize
            | Self::HfIdentityCollapse => CodeFamily::Hard,
            Self::Sf01IdentityDrift
            | Self::Sf02PaletteDrift
            | Self::Sf03AlphaHalo
            | Self::Sf04BaselineDrift
            | Self::Sf05PixelNoise => CodeFamily::Soft,
            Self::SysGenerator | Self::SysNetwork | Self::SysTimeout | Self::SysPacker => {
                CodeFamily::System
            }
            Self::DepPackerMissing | Self::DepBrowserMissing | Self::DepApiKeyMissing => {
                CodeFamily::Dependency
            }
        }
    }

    /// Stable human-readable message.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Hf01DimensionMismatch => "candidate dimensions do not match the target canvas",
            Self::Hf02FullyTransparent => "candidate contains no opaque pixels",
            Self::Hf03Corrupted => "candidate file does not decode",
            Self::Hf04WrongColorDepth => "candidate is not 32-bit RGBA",
            Self::Hf05FileSize => "candidate file size is outside configured bounds",
            Self::Sf01IdentityDrift => "structural similarity to the anchor fell below threshold",
            Self::Sf02PaletteDrift => "too many pixels fall outside the locked palette",
            Self::Sf03AlphaHalo => "semi-transparent halo or bright fringe on sprite edges",
            Self::Sf04BaselineDrift => "sprite baseline drifted from the anchor ground line",
            Self::Sf05PixelNoise => "isolated orphan pixels exceed the noise budget",
            Self::HfIdentityCollapse => "identity could not be recovered even from the anchor alone",
            Self::SysGenerator => "generator returned an error",
            Self::SysNetwork => "network failure while calling the generator",
            Self::SysTimeout => "external call timed out",
            Self::SysPacker => "atlas packer subprocess failed",
            Self::DepPackerMissing => "atlas packer executable not found",
            Self::DepBrowserMissing => "headless browser executable not found",
            Self::DepApiKeyMissing => "generator API credential not configured",
        }
    }

    /// Suggested fix, surfaced with the message in terminal output.
    #[must_use]
    pub fn fix(self) -> &'static str {
        match self {
            Self::Hf01DimensionMismatch => {
                "check canvas.generation_size and the generator's output resolution"
            }
            Self::Hf02FullyTransparent => "verify the transparency strategy and chroma tolerance",
            Self::Hf03Corrupted => "regenerate the frame; inspect generator output encoding",
            Self::Hf04WrongColorDepth => "force RGBA output; avoid palette-indexed PNG export",
            Self::Hf05FileSize => "adjust auditor.file_size_bounds or inspect the candidate",
            Self::Sf01IdentityDrift => "increase anchor contrast or tighten the identity prompt",
            Self::Sf02PaletteDrift => "strengthen the negative prompt against off-palette colors",
            Self::Sf03AlphaHalo => "use chroma keying or enable post-process edge cleanup",
            Self::Sf04BaselineDrift => "enable vertical_lock in canvas.alignment",
            Self::Sf05PixelNoise => "enable POST_PROCESS cleanup in the retry ladder",
            Self::HfIdentityCollapse => "increase anchor contrast; simplify the requested pose",
            Self::SysGenerator => "inspect the generator error detail in the audit log",
            Self::SysNetwork => "check connectivity; the pipeline retries with backoff",
            Self::SysTimeout => "raise the call timeout or reduce generation size",
            Self::SysPacker => "inspect texturepacker.json for the subprocess output",
            Self::DepPackerMissing => "install the packer or set the packer path env override",
            Self::DepBrowserMissing => "install a headless browser or disable engine tests",
            Self::DepApiKeyMissing => "export the generator API credential env var",
        }
    }

    /// True for codes the retry ladder reacts to (hard or soft audit faults).
    #[must_use]
    pub fn is_audit_fault(self) -> bool {
        matches!(self.family(), CodeFamily::Hard | CodeFamily::Soft)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_round_trip() {
        let codes = [
            ReasonCode::Hf01DimensionMismatch,
            ReasonCode::Hf05FileSize,
            ReasonCode::Sf03AlphaHalo,
            ReasonCode::HfIdentityCollapse,
            ReasonCode::SysTimeout,
            ReasonCode::DepApiKeyMissing,
        ];
        for code in codes {
            assert_eq!(ReasonCode::parse(code.as_str()), Some(code));
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: ReasonCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn families() {
        assert_eq!(ReasonCode::HfIdentityCollapse.family(), CodeFamily::Hard);
        assert_eq!(ReasonCode::Sf04BaselineDrift.family(), CodeFamily::Soft);
        assert_eq!(ReasonCode::SysPacker.family(), CodeFamily::System);
        assert_eq!(
            ReasonCode::DepBrowserMissing.family(),
            CodeFamily::Dependency
        );
    }

    #[test]
    fn every_code_has_message_and_fix() {
        for s in [
            "HF01_DIMENSION_MISMATCH",
            "HF02_FULLY_TRANSPARENT",
            "HF03_CORRUPTED",
            "HF04_WRONG_COLOR_DEPTH",
            "HF05_FILE_SIZE",
            "SF01_IDENTITY_DRIFT",
            "SF02_PALETTE_DRIFT",
            "SF03_ALPHA_HALO",
            "SF04_BASELINE_DRIFT",
            "SF05_PIXEL_NOISE",
            "HF_IDENTITY_COLLAPSE",
            "SYS_GENERATOR",
            "SYS_NETWORK",
            "SYS_TIMEOUT",
            "SYS_PACKER",
            "DEP_PACKER_MISSING",
            "DEP_BROWSER_MISSING",
            "DEP_API_KEY_MISSING",
        ] {
            let code = ReasonCode::parse(s).expect("known code");
            assert!(!code.message().is_empty());
            assert!(!code.fix().is_empty());
        }
    }
}
