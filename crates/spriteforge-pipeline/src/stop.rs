//! Run-level stop conditions and the diagnostic report.
//!
//! Evaluated after every frame resolution. A stop preserves all approved
//! frames and writes `diagnostic.json`: the root cause, the failure-code
//! histogram with example frames, and recovery suggestions ordered by
//! priority, enough for an operator to fix the manifest instead of
//! re-reading logs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use spriteforge_core::clock;
use spriteforge_core::manifest::StopConditions;
use spriteforge_core::reason::ReasonCode;
use spriteforge_core::state::{FrameAccounting, RunState};

/// Which condition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    RetryRate,
    RejectRate,
    ConsecutiveFails,
    CostBudget,
    Aborted,
}

/// A fired stop condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopVerdict {
    pub cause: StopCause,
    pub detail: String,
}

/// Evaluate all stop conditions against the current state.
#[must_use]
pub fn evaluate(state: &RunState, conditions: &StopConditions) -> Option<StopVerdict> {
    let attempted = state.attempted_frames();
    if attempted > 0 {
        let retry_rate = f64::from(state.retried_frames()) / f64::from(attempted);
        if retry_rate > conditions.retry_rate {
            return Some(StopVerdict {
                cause: StopCause::RetryRate,
                detail: format!(
                    "retry rate {retry_rate:.2} exceeds {:.2} over {attempted} attempted frames",
                    conditions.retry_rate
                ),
            });
        }
        let reject_rate = f64::from(state.accounting().failed) / f64::from(attempted);
        if reject_rate > conditions.reject_rate {
            return Some(StopVerdict {
                cause: StopCause::RejectRate,
                detail: format!(
                    "reject rate {reject_rate:.2} exceeds {:.2} over {attempted} attempted frames",
                    conditions.reject_rate
                ),
            });
        }
    }

    let streak = state.consecutive_failed_frames();
    if streak >= conditions.consecutive_fails {
        return Some(StopVerdict {
            cause: StopCause::ConsecutiveFails,
            detail: format!(
                "{streak} consecutive failed frames (limit {})",
                conditions.consecutive_fails
            ),
        });
    }

    if let Some(budget) = conditions.cost_budget {
        let spent = f64::from(state.total_attempts()) * conditions.per_attempt_cost;
        if spent > budget {
            return Some(StopVerdict {
                cause: StopCause::CostBudget,
                detail: format!("estimated cost {spent:.2} exceeds budget {budget:.2}"),
            });
        }
    }

    None
}

/// One failure code's tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCount {
    pub code: String,
    pub count: u32,
    pub example_frames: Vec<u32>,
}

/// One prioritized recovery suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySuggestion {
    pub priority: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub suggestion: String,
}

/// Contents of `diagnostic.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub stop_cause: StopCause,
    pub root_cause: String,
    pub detail: String,
    pub top_failure_codes: Vec<CodeCount>,
    pub recovery_suggestions: Vec<RecoverySuggestion>,
    pub accounting: FrameAccounting,
    pub total_attempts: u32,
    pub generated_at: String,
}

/// Build the diagnostic for a stopped run.
#[must_use]
pub fn build_diagnostic(state: &RunState, verdict: &StopVerdict) -> DiagnosticReport {
    // Histogram of reason codes across every recorded attempt, with the
    // frames they appeared on.
    let mut tallies: BTreeMap<String, (u32, BTreeSet<u32>)> = BTreeMap::new();
    for (frame, attempts) in state.frame_attempts.iter().enumerate() {
        for attempt in attempts {
            for code in &attempt.reason_codes {
                let entry = tallies.entry(code.as_str().to_string()).or_default();
                entry.0 += 1;
                entry.1.insert(frame as u32);
            }
        }
    }
    let mut top_failure_codes: Vec<CodeCount> = tallies
        .into_iter()
        .map(|(code, (count, frames))| CodeCount {
            code,
            count,
            example_frames: frames.into_iter().take(5).collect(),
        })
        .collect();
    // Hard codes are terminal verdicts and outrank soft codes regardless of
    // volume; within a family, counts decide.
    let severity = |code: &str| match ReasonCode::parse(code).map(ReasonCode::family) {
        Some(spriteforge_core::CodeFamily::Hard) => 0u8,
        Some(spriteforge_core::CodeFamily::System) => 1,
        Some(spriteforge_core::CodeFamily::Dependency) => 2,
        _ => 3,
    };
    top_failure_codes.sort_by(|a, b| {
        severity(&a.code)
            .cmp(&severity(&b.code))
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.code.cmp(&b.code))
    });

    let recovery_suggestions: Vec<RecoverySuggestion> = top_failure_codes
        .iter()
        .take(5)
        .enumerate()
        .filter_map(|(rank, cc)| {
            ReasonCode::parse(&cc.code).map(|code| RecoverySuggestion {
                priority: rank as u32 + 1,
                code: Some(cc.code.clone()),
                suggestion: code.fix().to_string(),
            })
        })
        .collect();

    let root_cause = top_failure_codes
        .first()
        .and_then(|cc| ReasonCode::parse(&cc.code))
        .map_or_else(|| verdict.detail.clone(), |c| c.message().to_string());

    DiagnosticReport {
        stop_cause: verdict.cause,
        root_cause,
        detail: verdict.detail.clone(),
        top_failure_codes,
        recovery_suggestions,
        accounting: state.accounting(),
        total_attempts: state.total_attempts(),
        generated_at: clock::now_utc(),
    }
}
