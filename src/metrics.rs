//! Prometheus metrics collection for phaseshift
//!
//! This module provides metrics instrumentation for tracking:
//! - Requests served per source, and failures per source
//! - Request latency per source
//! - Fallbacks to the mock source and shadow-read mismatches
//! - Rollback events by trigger
//! - Current migration phase and traffic percentage
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! They complement [`crate::recorder::MetricsRecorder`], which holds the
//! per-attempt counters the validation gate reads; Prometheus counters are
//! process-lifetime and never reset.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::coordinator::{MigrationPhase, RollbackTrigger};
use crate::source::SourceKind;

/// Metrics collector for phaseshift
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    request_failures: IntCounterVec,
    request_duration: HistogramVec,
    fallbacks: IntCounter,
    shadow_mismatches: IntCounter,
    rollback_events: IntCounterVec,
    traffic_percentage: IntGauge,
    phase: IntGauge,
    metrics_recording_failures: IntCounter,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 sources
        let requests_total = IntCounterVec::new(
            Opts::new(
                "phaseshift_requests_total",
                "Total read requests by the source that served them (after fallback)",
            ),
            &["source"],
        )?;

        let request_failures = IntCounterVec::new(
            Opts::new(
                "phaseshift_request_failures_total",
                "Read requests that failed and were surfaced to the caller, by source",
            ),
            &["source"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "phaseshift_request_duration_ms",
                "Read request latency in milliseconds by serving source",
            )
            .buckets(vec![
                1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0,
            ]),
            &["source"],
        )?;

        let fallbacks = IntCounter::with_opts(Opts::new(
            "phaseshift_fallbacks_total",
            "Real-source failures served by the mock source instead",
        ))?;

        let shadow_mismatches = IntCounter::with_opts(Opts::new(
            "phaseshift_shadow_mismatches_total",
            "Shadow reads whose payload disagreed with the served payload",
        ))?;

        // Cardinality: 3 triggers (manual, automatic, abort)
        let rollback_events = IntCounterVec::new(
            Opts::new(
                "phaseshift_rollbacks_total",
                "Rollback and abort events by trigger. Alert on any automatic increment.",
            ),
            &["trigger"],
        )?;

        let traffic_percentage = IntGauge::with_opts(Opts::new(
            "phaseshift_traffic_percentage",
            "Share of read traffic currently routed to the real source (0-100)",
        ))?;

        let phase = IntGauge::with_opts(Opts::new(
            "phaseshift_phase",
            "Current migration phase ordinal (0=idle, 1-5=canary5..full, 6=completed, \
            7=rolled_back, 8=aborted)",
        ))?;

        let metrics_recording_failures = IntCounter::with_opts(Opts::new(
            "phaseshift_metrics_recording_failures_total",
            "Total number of metrics recording operation failures. \
            Indicates Prometheus internal errors - frequent failures require investigation.",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_failures.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(shadow_mismatches.clone()))?;
        registry.register(Box::new(rollback_events.clone()))?;
        registry.register(Box::new(traffic_percentage.clone()))?;
        registry.register(Box::new(phase.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_failures,
            request_duration,
            fallbacks,
            shadow_mismatches,
            rollback_events,
            traffic_percentage,
            phase,
            metrics_recording_failures,
        })
    }

    /// Record a served request and its latency
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite, or negative. Such
    /// values would corrupt every histogram percentile.
    pub fn record_request(
        &self,
        source: SourceKind,
        success: bool,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }

        self.requests_total
            .get_metric_with_label_values(&[source.as_str()])?
            .inc();
        if !success {
            self.request_failures
                .get_metric_with_label_values(&[source.as_str()])?
                .inc();
        }
        self.request_duration
            .get_metric_with_label_values(&[source.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn record_fallback(&self) {
        self.fallbacks.inc();
    }

    pub fn record_shadow_mismatch(&self) {
        self.shadow_mismatches.inc();
    }

    /// Record a rollback or abort event
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_rollback(&self, trigger: RollbackTrigger) -> Result<(), prometheus::Error> {
        self.rollback_events
            .get_metric_with_label_values(&[trigger.as_str()])?
            .inc();
        Ok(())
    }

    /// Mirror the published phase and percentage into gauges
    pub fn set_migration_state(&self, phase: MigrationPhase, percentage: u8) {
        self.phase.set(phase.ordinal());
        self.traffic_percentage.set(i64::from(percentage));
    }

    /// Record a metrics recording operation failure
    ///
    /// Called when one of the `record_*` methods returns an error. Requests
    /// continue normally; only observability data is incomplete.
    pub fn metrics_recording_failure(&self, operation: &str) {
        tracing::warn!(operation = %operation, "Metrics recording operation failed");
        self.metrics_recording_failures.inc();
    }

    /// Number of metrics recording failures since startup
    ///
    /// Used by the /health endpoint to report metrics system status.
    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.metrics_recording_failures.get()
    }

    pub fn fallbacks_count(&self) -> u64 {
        self.fallbacks.get()
    }

    pub fn traffic_percentage(&self) -> i64 {
        self.traffic_percentage.get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new_creates_registry() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics
            .record_request(SourceKind::Mock, true, 12.0)
            .expect("Test operation should succeed");
        metrics
            .record_rollback(RollbackTrigger::Automatic)
            .expect("Test operation should succeed");
        metrics.record_fallback();

        let output = metrics.gather().expect("should gather");
        assert!(output.contains("phaseshift_requests_total"));
        assert!(output.contains("phaseshift_request_duration_ms"));
        assert!(output.contains("phaseshift_rollbacks_total"));
        assert!(output.contains("phaseshift_fallbacks_total"));
        assert!(output.contains("phaseshift_traffic_percentage"));
    }

    #[test]
    fn test_record_request_rejects_nan_duration() {
        let metrics = Metrics::new().unwrap();
        let err = metrics
            .record_request(SourceKind::Real, true, f64::NAN)
            .unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn test_record_request_rejects_negative_duration() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.record_request(SourceKind::Real, true, -1.0).is_err());
    }

    #[test]
    fn test_failed_request_counts_failure_label() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(SourceKind::Real, false, 3.0).unwrap();
        let output = metrics.gather().unwrap();
        assert!(output.contains(r#"phaseshift_request_failures_total{source="real"} 1"#));
    }

    #[test]
    fn test_set_migration_state_updates_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.set_migration_state(MigrationPhase::Canary50, 50);
        assert_eq!(metrics.traffic_percentage(), 50);
        let output = metrics.gather().unwrap();
        assert!(output.contains("phaseshift_phase 3"));
    }

    #[test]
    fn test_recording_failures_are_counted() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.metrics_recording_failures_count(), 0);
        metrics.metrics_recording_failure("record_request");
        assert_eq!(metrics.metrics_recording_failures_count(), 1);
    }
}
