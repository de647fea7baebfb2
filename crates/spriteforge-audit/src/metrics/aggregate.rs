//! Composite scoring.
//!
//! Group weights (stability / identity / palette / style) are split evenly
//! among the enabled metrics of each group that actually produced a counted
//! result, then renormalized so the effective weights sum to 1. Metrics that
//! bypassed or skipped themselves contribute nothing and shift no weight.

use serde::{Deserialize, Serialize};
use serde_json::json;
use spriteforge_core::manifest::{MetricId, MetricWeights};

/// Outcome of compositing the counted metric scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeOutcome {
    /// Weighted composite in `[0, 1]`.
    pub composite: f64,
    /// True when the composite fell below the configured threshold.
    pub should_retry: bool,
    /// Effective (renormalized) weight per counted metric.
    pub weights_used: Vec<(MetricId, f64)>,
}

/// Compose `(metric, score)` pairs under the configured group weights.
#[must_use]
pub fn compose(
    entries: &[(MetricId, f64)],
    weights: &MetricWeights,
    composite_threshold: f64,
) -> CompositeOutcome {
    if entries.is_empty() {
        // Nothing measured: nothing to retry over.
        return CompositeOutcome {
            composite: 0.0,
            should_retry: false,
            weights_used: Vec::new(),
        };
    }

    let group_count = |id: MetricId| {
        entries
            .iter()
            .filter(|(other, _)| other.group() == id.group())
            .count() as f64
    };

    let raw: Vec<(MetricId, f64)> = entries
        .iter()
        .map(|(id, _)| (*id, weights.for_group(id.group()) / group_count(*id)))
        .collect();
    let total: f64 = raw.iter().map(|(_, w)| w).sum();
    if total <= f64::EPSILON {
        // All weights zeroed out by configuration; guard the denominator.
        return CompositeOutcome {
            composite: 0.0,
            should_retry: false,
            weights_used: Vec::new(),
        };
    }

    let weights_used: Vec<(MetricId, f64)> =
        raw.into_iter().map(|(id, w)| (id, w / total)).collect();
    let composite = entries
        .iter()
        .zip(weights_used.iter())
        .map(|((_, score), (_, w))| score * w)
        .sum::<f64>()
        .clamp(0.0, 1.0);

    CompositeOutcome {
        composite,
        should_retry: composite < composite_threshold,
        weights_used,
    }
}

/// Serializable view of the effective weights for the metrics report.
#[must_use]
pub fn weights_json(outcome: &CompositeOutcome) -> serde_json::Value {
    json!(
        outcome
            .weights_used
            .iter()
            .map(|(id, w)| (id.as_str().to_string(), *w))
            .collect::<std::collections::BTreeMap<String, f64>>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_weights() -> MetricWeights {
        MetricWeights {
            stability: 0.35,
            identity: 0.30,
            palette: 0.20,
            style: 0.15,
        }
    }

    #[test]
    fn full_suite_weights_sum_to_one() {
        let entries = [
            (MetricId::Ssim, 1.0),
            (MetricId::Palette, 1.0),
            (MetricId::Alpha, 1.0),
            (MetricId::Baseline, 1.0),
            (MetricId::Mapd, 1.0),
            (MetricId::Orphan, 1.0),
        ];
        let outcome = compose(&entries, &default_weights(), 0.8);
        let total: f64 = outcome.weights_used.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((outcome.composite - 1.0).abs() < 1e-9);
        assert!(!outcome.should_retry);
    }

    #[test]
    fn weights_renormalize_when_metrics_drop_out() {
        // MAPD bypassed: stability weight concentrates on baseline.
        let entries = [
            (MetricId::Ssim, 0.9),
            (MetricId::Baseline, 1.0),
        ];
        let outcome = compose(&entries, &default_weights(), 0.8);
        let total: f64 = outcome.weights_used.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // identity 0.30 vs stability 0.35, renormalized over 0.65.
        let ssim_w = outcome
            .weights_used
            .iter()
            .find(|(id, _)| *id == MetricId::Ssim)
            .unwrap()
            .1;
        assert!((ssim_w - 0.30 / 0.65).abs() < 1e-9);
    }

    #[test]
    fn low_composite_requests_retry() {
        let entries = [(MetricId::Ssim, 0.4), (MetricId::Palette, 0.5)];
        let outcome = compose(&entries, &default_weights(), 0.8);
        assert!(outcome.composite < 0.8);
        assert!(outcome.should_retry);
    }

    #[test]
    fn empty_entries_guarded() {
        let outcome = compose(&[], &default_weights(), 0.8);
        assert!((outcome.composite - 0.0).abs() < 1e-9);
        assert!(!outcome.should_retry);
    }

    #[test]
    fn zero_weights_guarded() {
        let zero = MetricWeights {
            stability: 0.0,
            identity: 0.0,
            palette: 0.0,
            style: 0.0,
        };
        let outcome = compose(&[(MetricId::Ssim, 1.0)], &zero, 0.8);
        assert!(!outcome.should_retry);
        assert!(outcome.weights_used.is_empty());
    }
}
