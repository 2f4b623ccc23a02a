//! Per-request source selection with fallback and shadow reads

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Semaphore;

use super::{
    DataSource, RandomSource, RequestContext, ShadowComparator, SourceKind, SourceMode,
    ThreadRandom,
};
use crate::coordinator::StatusReceiver;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::recorder::MetricsRecorder;

/// Runtime routing settings, changeable by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSettings {
    pub mode: SourceMode,
    pub fallback_enabled: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            mode: SourceMode::Hybrid,
            fallback_enabled: true,
        }
    }
}

/// Result of a served read
#[derive(Debug, Clone)]
pub struct Served {
    pub payload: serde_json::Value,
    /// Source that actually produced the payload
    pub served_by: SourceKind,
    /// Source the routing decision picked before any fallback
    pub selected: SourceKind,
    pub fell_back: bool,
    pub latency_ms: f64,
}

struct ShadowReads {
    comparator: Arc<dyn ShadowComparator>,
    /// Fraction of served reads that are also read from the other source
    sample_rate: f64,
    /// Kept apart from the routing draw so sampling never shifts routing
    sampler: Arc<dyn RandomSource>,
}

/// Routes each read to the mock or real source
///
/// Reads the migration percentage from the coordinator's published snapshot
/// and never mutates migration state. Every call to [`fetch`](Self::fetch)
/// writes exactly one outcome to the recorder, attributed to the source that
/// served the data.
///
/// Shadow reads run only while a migration is active at a non-zero
/// percentage, each holding an in-flight permit. Their outcome is dropped if
/// the attempt it was sampled in has ended by the time it completes.
pub struct DataSourceManager {
    mock: Arc<dyn DataSource>,
    real: Arc<dyn DataSource>,
    recorder: Arc<MetricsRecorder>,
    metrics: Arc<Metrics>,
    status: StatusReceiver,
    random: Arc<dyn RandomSource>,
    settings: RwLock<SourceSettings>,
    shadow: Option<ShadowReads>,
    in_flight: Option<Arc<Semaphore>>,
}

impl DataSourceManager {
    pub fn new(
        mock: Arc<dyn DataSource>,
        real: Arc<dyn DataSource>,
        recorder: Arc<MetricsRecorder>,
        metrics: Arc<Metrics>,
        status: StatusReceiver,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            mock,
            real,
            recorder,
            metrics,
            status,
            random,
            settings: RwLock::new(SourceSettings::default()),
            shadow: None,
            in_flight: None,
        }
    }

    pub fn with_settings(self, settings: SourceSettings) -> Self {
        *self.settings.write().unwrap_or_else(|p| p.into_inner()) = settings;
        self
    }

    /// Enable shadow reads for a sampled fraction of served requests
    pub fn with_shadow(mut self, comparator: Arc<dyn ShadowComparator>, sample_rate: f64) -> Self {
        self.shadow = Some(ShadowReads {
            comparator,
            sample_rate: sample_rate.clamp(0.0, 1.0),
            sampler: Arc::new(ThreadRandom),
        });
        self
    }

    /// Replace the draw used for shadow sampling
    ///
    /// Has no effect unless shadow reads are enabled.
    pub fn with_shadow_sampler(mut self, sampler: Arc<dyn RandomSource>) -> Self {
        if let Some(shadow) = &mut self.shadow {
            shadow.sampler = sampler;
        }
        self
    }

    /// Bound the number of reads in flight with a shared limiter
    ///
    /// The same limiter can back the capacity preflight check.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.in_flight = Some(limiter);
        self
    }

    pub fn config(&self) -> SourceSettings {
        *self.settings.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Change the routing override
    pub fn set_mode(&self, mode: SourceMode) {
        let mut settings = self.settings.write().unwrap_or_else(|p| p.into_inner());
        let previous = settings.mode;
        settings.mode = mode;
        tracing::info!(from = ?previous, to = ?mode, "Data source mode changed");
    }

    pub fn set_fallback_enabled(&self, enabled: bool) {
        self.settings
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .fallback_enabled = enabled;
        tracing::info!(fallback_enabled = enabled, "Data source fallback setting changed");
    }

    /// Free in-flight permits, `None` when unbounded
    pub fn available_capacity(&self) -> Option<usize> {
        self.in_flight.as_ref().map(|s| s.available_permits())
    }

    pub fn mock_source(&self) -> &Arc<dyn DataSource> {
        &self.mock
    }

    pub fn real_source(&self) -> &Arc<dyn DataSource> {
        &self.real
    }

    fn source(&self, kind: SourceKind) -> &Arc<dyn DataSource> {
        match kind {
            SourceKind::Mock => &self.mock,
            SourceKind::Real => &self.real,
        }
    }

    /// Pick the source for one request
    ///
    /// In hybrid mode this is an independent Bernoulli trial per request: a
    /// uniform draw `r` in `[0, 100)` selects the real source iff `r` is below
    /// the current percentage.
    pub fn decide_source(&self, ctx: &RequestContext) -> SourceKind {
        match self.config().mode {
            SourceMode::Mock => SourceKind::Mock,
            SourceMode::Real => SourceKind::Real,
            SourceMode::Hybrid => {
                let percentage = self.status.borrow().percentage;
                let draw = self.random.next_percent();
                let kind = if draw < f64::from(percentage) {
                    SourceKind::Real
                } else {
                    SourceKind::Mock
                };
                tracing::trace!(
                    request_id = %ctx.request_id,
                    percentage,
                    draw,
                    source = %kind,
                    "Routing decision"
                );
                kind
            }
        }
    }

    fn record(&self, latency_ms: f64, success: bool, source: SourceKind) {
        self.recorder.record(latency_ms, success, source);
        if self
            .metrics
            .record_request(source, success, latency_ms)
            .is_err()
        {
            self.metrics.metrics_recording_failure("record_request");
        }
    }

    /// Serve one read through the migrated path
    ///
    /// # Errors
    ///
    /// `SourceUnavailable` when the selected source fails and no fallback
    /// applies, or when both the real source and the fallback fail.
    pub async fn fetch(&self, ctx: &RequestContext) -> AppResult<Served> {
        let _permit = match &self.in_flight {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| AppError::Internal("in-flight limiter closed".to_string()))?,
            ),
            None => None,
        };

        let selected = self.decide_source(ctx);
        let fallback_enabled = self.config().fallback_enabled;
        let started = Instant::now();

        let error = match self.source(selected).fetch(ctx).await {
            Ok(payload) => {
                let latency_ms = elapsed_ms(started);
                self.record(latency_ms, true, selected);
                self.spawn_shadow_read(ctx, selected, &payload);
                return Ok(Served {
                    payload,
                    served_by: selected,
                    selected,
                    fell_back: false,
                    latency_ms,
                });
            }
            Err(e) => e,
        };

        if selected == SourceKind::Mock || !fallback_enabled {
            let latency_ms = elapsed_ms(started);
            self.record(latency_ms, false, selected);
            tracing::warn!(
                request_id = %ctx.request_id,
                source = %selected,
                error = %error,
                "Read failed without fallback"
            );
            return Err(AppError::SourceUnavailable {
                source_kind: selected,
                reason: error.to_string(),
            });
        }

        tracing::warn!(
            request_id = %ctx.request_id,
            resource = %ctx.resource,
            error = %error,
            "Real source failed, falling back to mock"
        );

        match self.mock.fetch(ctx).await {
            Ok(payload) => {
                let latency_ms = elapsed_ms(started);
                self.record(latency_ms, true, SourceKind::Mock);
                self.recorder.record_fallback();
                self.metrics.record_fallback();
                Ok(Served {
                    payload,
                    served_by: SourceKind::Mock,
                    selected,
                    fell_back: true,
                    latency_ms,
                })
            }
            Err(mock_error) => {
                let latency_ms = elapsed_ms(started);
                self.record(latency_ms, false, SourceKind::Mock);
                tracing::error!(
                    request_id = %ctx.request_id,
                    real_error = %error,
                    mock_error = %mock_error,
                    "Fallback to mock failed after real source failure"
                );
                Err(AppError::SourceUnavailable {
                    source_kind: SourceKind::Mock,
                    reason: format!("real: {error}; mock fallback: {mock_error}"),
                })
            }
        }
    }

    /// Read the other source in the background and record agreement
    fn spawn_shadow_read(&self, ctx: &RequestContext, served_by: SourceKind, payload: &serde_json::Value) {
        let Some(shadow) = &self.shadow else {
            return;
        };
        let attempt_id = {
            let snapshot = self.status.borrow();
            if !snapshot.active || snapshot.percentage == 0 {
                return;
            }
            snapshot.attempt_id
        };
        if shadow.sampler.next_percent() >= shadow.sample_rate * 100.0 {
            return;
        }

        let permit = match &self.in_flight {
            Some(limit) => match Arc::clone(limit).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::trace!(
                        request_id = %ctx.request_id,
                        "No in-flight capacity left, skipping shadow read"
                    );
                    return;
                }
            },
            None => None,
        };

        let other = Arc::clone(self.source(served_by.other()));
        let comparator = Arc::clone(&shadow.comparator);
        let recorder = Arc::clone(&self.recorder);
        let metrics = Arc::clone(&self.metrics);
        let status = self.status.clone();
        let ctx = ctx.clone();
        let served = payload.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match other.fetch(&ctx).await {
                Ok(shadow_payload) => {
                    if status.borrow().attempt_id != attempt_id {
                        tracing::debug!(
                            request_id = %ctx.request_id,
                            "Shadow read outlived its migration attempt, discarding"
                        );
                        return;
                    }
                    let (mock, real) = match served_by {
                        SourceKind::Mock => (&served, &shadow_payload),
                        SourceKind::Real => (&shadow_payload, &served),
                    };
                    let agreed = comparator.agrees(mock, real);
                    recorder.record_shadow(agreed);
                    if !agreed {
                        metrics.record_shadow_mismatch();
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            resource = %ctx.resource,
                            comparator = comparator.name(),
                            "Shadow read disagreed with served payload"
                        );
                    }
                }
                Err(e) => {
                    // A failed shadow read is not evidence either way
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        shadow_source = %served_by.other(),
                        error = %e,
                        "Shadow read failed"
                    );
                }
            }
        });
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
