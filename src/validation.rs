//! Validation gate evaluated on every supervisory tick
//!
//! The gate is a pure function of a [`MetricsSnapshot`] and the current
//! phase's [`PhaseSpec`]. It never records anything; the coordinator decides
//! what a verdict means (hold, advance, or count toward a rollback).
//!
//! # Missing evidence
//!
//! - A request window holding fewer than the phase's `min_samples` outcomes,
//!   including an empty one, passes `error_rate` and `performance`. A single
//!   slow or failed read in a quiet phase is not a trend, and blocking on it
//!   would stall the migration during quiet periods.
//! - Without shadow samples (no comparator configured, or none sampled yet)
//!   `data_integrity` passes and the report carries `shadow_available = false`.

use serde::{Deserialize, Serialize};

use crate::coordinator::PhaseSpec;
use crate::recorder::MetricsSnapshot;

/// The three gate verdicts exposed in the migration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub data_integrity: bool,
    pub performance: bool,
    pub error_rate: bool,
}

impl ValidationVerdict {
    /// Verdict reported before any tick has run
    pub const PASSING: Self = Self {
        data_integrity: true,
        performance: true,
        error_rate: true,
    };

    pub fn all_pass(&self) -> bool {
        self.data_integrity && self.performance && self.error_rate
    }

    /// Names of the failing checks, in a stable order
    pub fn failing_checks(&self) -> Vec<&'static str> {
        let mut failing = Vec::new();
        if !self.data_integrity {
            failing.push("data_integrity");
        }
        if !self.performance {
            failing.push("performance");
        }
        if !self.error_rate {
            failing.push("error_rate");
        }
        failing
    }
}

impl Default for ValidationVerdict {
    fn default() -> Self {
        Self::PASSING
    }
}

/// Verdict plus the observations it was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct GateReport {
    pub verdict: ValidationVerdict,
    pub samples: usize,
    pub observed_error_rate: Option<f64>,
    pub observed_p95_ms: Option<f64>,
    pub observed_mismatch_rate: Option<f64>,
    /// False when `data_integrity` passed only because no shadow data existed
    pub shadow_available: bool,
    /// False when `error_rate` and `performance` passed for lack of samples
    pub sufficient_samples: bool,
}

/// Stateless evaluator of phase thresholds
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGate;

impl ValidationGate {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot, spec: &PhaseSpec) -> GateReport {
        let observed_error_rate = snapshot.error_rate();
        let observed_p95_ms = snapshot.p95_latency_ms();
        let observed_mismatch_rate = snapshot.shadow_mismatch_rate();
        let sufficient_samples =
            !snapshot.window.is_empty() && snapshot.window.len() >= spec.min_samples;

        let error_rate = !sufficient_samples
            || observed_error_rate
                .map(|rate| rate < spec.error_rate_threshold)
                .unwrap_or(true);
        let performance = !sufficient_samples
            || observed_p95_ms
                .map(|p95| p95 < spec.p95_latency_threshold_ms)
                .unwrap_or(true);
        let data_integrity = observed_mismatch_rate
            .map(|rate| rate <= spec.integrity_tolerance)
            .unwrap_or(true);

        GateReport {
            verdict: ValidationVerdict {
                data_integrity,
                performance,
                error_rate,
            },
            samples: snapshot.window.len(),
            observed_error_rate,
            observed_p95_ms,
            observed_mismatch_rate,
            shadow_available: observed_mismatch_rate.is_some(),
            sufficient_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MetricsRecorder;
    use crate::source::SourceKind;
    use std::time::Duration;

    fn spec() -> PhaseSpec {
        PhaseSpec {
            target_percentage: 5,
            min_hold: Duration::from_secs(300),
            error_rate_threshold: 0.01,
            p95_latency_threshold_ms: 200.0,
            integrity_tolerance: 0.05,
            min_samples: 20,
        }
    }

    #[test]
    fn test_empty_window_passes_vacuously() {
        let report = ValidationGate::new().evaluate(&MetricsSnapshot::default(), &spec());
        assert!(report.verdict.all_pass());
        assert_eq!(report.samples, 0);
        assert_eq!(report.observed_error_rate, None);
        assert!(!report.shadow_available);
        assert!(!report.sufficient_samples);
    }

    #[test]
    fn test_window_below_min_samples_is_not_judged() {
        let recorder = MetricsRecorder::new(1000);
        recorder.record(900.0, false, SourceKind::Real);
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.verdict.all_pass());
        assert!(!report.sufficient_samples);
        assert_eq!(report.observed_error_rate, Some(1.0));

        // The same failure rate is judged once the window reaches min_samples
        for _ in 0..19 {
            recorder.record(900.0, false, SourceKind::Real);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.sufficient_samples);
        assert!(!report.verdict.error_rate);
        assert!(!report.verdict.performance);
    }

    #[test]
    fn test_early_shadow_mismatch_ages_out_of_integrity_check() {
        let recorder = MetricsRecorder::new(100);
        let strict = PhaseSpec {
            integrity_tolerance: 0.01,
            ..spec()
        };
        recorder.record_shadow(false);
        for _ in 0..50 {
            recorder.record_shadow(true);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &strict);
        assert!(!report.verdict.data_integrity);

        for _ in 0..100 {
            recorder.record(10.0, true, SourceKind::Real);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &strict);
        assert!(report.verdict.all_pass());
        assert!(!report.shadow_available);
    }

    #[test]
    fn test_error_rate_below_threshold_passes() {
        let recorder = MetricsRecorder::new(1000);
        for i in 0..1000 {
            // 5 failures in 1000 = 0.5%
            recorder.record(10.0, i % 200 != 0, SourceKind::Real);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.verdict.error_rate);
        assert_eq!(report.observed_error_rate, Some(0.005));
    }

    #[test]
    fn test_error_rate_at_threshold_fails() {
        let recorder = MetricsRecorder::new(100);
        for i in 0..100 {
            recorder.record(10.0, i != 0, SourceKind::Real);
        }
        // Exactly 1% is not strictly below the 1% threshold
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(!report.verdict.error_rate);
        assert_eq!(report.verdict.failing_checks(), vec!["error_rate"]);
    }

    #[test]
    fn test_slow_p95_fails_performance() {
        let recorder = MetricsRecorder::new(100);
        for i in 0..100 {
            let latency = if i < 90 { 20.0 } else { 400.0 };
            recorder.record(latency, true, SourceKind::Real);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(!report.verdict.performance);
        assert!(report.verdict.error_rate);
        assert_eq!(report.observed_p95_ms, Some(400.0));
    }

    #[test]
    fn test_fast_p95_passes_performance() {
        let recorder = MetricsRecorder::new(100);
        for _ in 0..100 {
            recorder.record(50.0, true, SourceKind::Mock);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.verdict.performance);
    }

    #[test]
    fn test_integrity_without_shadow_data_degrades_to_pass() {
        let recorder = MetricsRecorder::new(10);
        recorder.record(10.0, true, SourceKind::Real);
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.verdict.data_integrity);
        assert!(!report.shadow_available);
    }

    #[test]
    fn test_integrity_fails_above_tolerance() {
        let recorder = MetricsRecorder::new(10);
        for i in 0..10 {
            recorder.record_shadow(i >= 2);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.shadow_available);
        assert!(!report.verdict.data_integrity);
        assert_eq!(report.observed_mismatch_rate, Some(0.2));
    }

    #[test]
    fn test_integrity_within_tolerance_passes() {
        let recorder = MetricsRecorder::new(10);
        for i in 0..100 {
            recorder.record_shadow(i != 0);
        }
        let report = ValidationGate::new().evaluate(&recorder.snapshot(), &spec());
        assert!(report.verdict.data_integrity);
    }

    #[test]
    fn test_failing_checks_lists_all_failures_in_order() {
        let verdict = ValidationVerdict {
            data_integrity: false,
            performance: false,
            error_rate: false,
        };
        assert_eq!(
            verdict.failing_checks(),
            vec!["data_integrity", "performance", "error_rate"]
        );
        assert!(!verdict.all_pass());
    }
}
