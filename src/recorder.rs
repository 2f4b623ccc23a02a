//! Request outcome recording
//!
//! [`MetricsRecorder`] keeps the per-attempt counters shown in the migration
//! status and a count-based sliding window of recent request outcomes that the
//! validation gate samples. The window holds the last `window_size` requests
//! regardless of age, so every tick evaluates the same amount of evidence once
//! traffic has filled it. Shadow comparison outcomes age out with the same
//! window: an outcome is dropped once every request served before it has been
//! evicted, and at most `window_size` outcomes are kept.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::source::SourceKind;

/// Default number of request outcomes kept in the sliding window
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Milliseconds since the UNIX epoch, 0 if the clock is before the epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of one routed read request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestMetric {
    pub timestamp_ms: u64,
    pub latency_ms: f64,
    pub success: bool,
    /// Source that actually served the request (after fallback)
    pub source: SourceKind,
}

/// Aggregate counters for the current migration attempt
///
/// `total_requests` is always `mock_requests + real_requests`. The real
/// source is reported as `firebaseRequests` for dashboard compatibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsCounters {
    pub total_requests: u64,
    pub mock_requests: u64,
    #[serde(rename = "firebaseRequests")]
    pub real_requests: u64,
    pub errors: u64,
    pub rollbacks: u64,
    pub fallbacks: u64,
}

/// Point-in-time copy of the recorder
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: MetricsCounters,
    /// Most recent outcomes, oldest first
    pub window: Vec<RequestMetric>,
    /// Shadow comparisons that agreed, within the window
    pub shadow_matches: u64,
    /// Shadow comparisons that disagreed, within the window
    pub shadow_mismatches: u64,
}

impl MetricsSnapshot {
    /// Fraction of failed requests in the window, `None` when the window is empty
    pub fn error_rate(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let failures = self.window.iter().filter(|m| !m.success).count();
        Some(failures as f64 / self.window.len() as f64)
    }

    /// Nearest-rank p95 latency over the window, `None` when the window is empty
    pub fn p95_latency_ms(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let mut latencies: Vec<f64> = self.window.iter().map(|m| m.latency_ms).collect();
        latencies.sort_by(f64::total_cmp);
        let rank = (0.95 * latencies.len() as f64).ceil() as usize;
        Some(latencies[rank.saturating_sub(1)])
    }

    /// Fraction of shadow comparisons that disagreed, `None` without shadow samples
    pub fn shadow_mismatch_rate(&self) -> Option<f64> {
        let total = self.shadow_matches + self.shadow_mismatches;
        if total == 0 {
            return None;
        }
        Some(self.shadow_mismatches as f64 / total as f64)
    }

    pub fn shadow_samples(&self) -> u64 {
        self.shadow_matches + self.shadow_mismatches
    }
}

#[derive(Debug, Clone, Copy)]
struct ShadowOutcome {
    /// Requests recorded when the comparison finished
    recorded_after: u64,
    agreed: bool,
}

#[derive(Debug, Default)]
struct RecorderState {
    mock_requests: u64,
    real_requests: u64,
    errors: u64,
    rollbacks: u64,
    fallbacks: u64,
    window: VecDeque<RequestMetric>,
    shadow: VecDeque<ShadowOutcome>,
}

impl RecorderState {
    fn total_requests(&self) -> u64 {
        self.mock_requests + self.real_requests
    }

    /// Drop shadow outcomes older than the oldest request still in the window
    fn evict_stale_shadow(&mut self, window_size: usize) {
        let total = self.total_requests();
        while let Some(front) = self.shadow.front() {
            if front.recorded_after + window_size as u64 > total {
                break;
            }
            self.shadow.pop_front();
        }
    }
}

/// Thread-safe recorder of request outcomes
///
/// All counters and the window live behind one mutex so every snapshot is a
/// consistent cut. Critical sections are a handful of integer updates and a
/// deque push, keeping `record` O(1) amortized.
#[derive(Debug)]
pub struct MetricsRecorder {
    state: Mutex<RecorderState>,
    window_size: usize,
}

impl MetricsRecorder {
    /// Create a recorder whose window keeps the last `window_size` outcomes
    ///
    /// A zero size is raised to 1.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            state: Mutex::new(RecorderState {
                window: VecDeque::with_capacity(window_size),
                ..RecorderState::default()
            }),
            window_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        // Counters stay meaningful even if a writer panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Record one served request
    pub fn record(&self, latency_ms: f64, success: bool, source: SourceKind) {
        let metric = RequestMetric {
            timestamp_ms: unix_millis(),
            latency_ms: if latency_ms.is_finite() {
                latency_ms.max(0.0)
            } else {
                0.0
            },
            success,
            source,
        };

        let mut state = self.lock();
        match source {
            SourceKind::Mock => state.mock_requests += 1,
            SourceKind::Real => state.real_requests += 1,
        }
        if !success {
            state.errors += 1;
        }
        if state.window.len() == self.window_size {
            state.window.pop_front();
        }
        state.window.push_back(metric);
        state.evict_stale_shadow(self.window_size);
    }

    /// Count a real-source failure that was served by mock instead
    pub fn record_fallback(&self) {
        self.lock().fallbacks += 1;
    }

    pub fn record_rollback(&self) {
        self.lock().rollbacks += 1;
    }

    /// Record whether a shadow read agreed with the served response
    pub fn record_shadow(&self, agreed: bool) {
        let mut state = self.lock();
        let recorded_after = state.total_requests();
        if state.shadow.len() == self.window_size {
            state.shadow.pop_front();
        }
        state.shadow.push_back(ShadowOutcome {
            recorded_after,
            agreed,
        });
    }

    /// Aggregate counters without copying the window
    pub fn counters(&self) -> MetricsCounters {
        let state = self.lock();
        counters_of(&state)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let shadow_matches = state.shadow.iter().filter(|o| o.agreed).count() as u64;
        MetricsSnapshot {
            counters: counters_of(&state),
            window: state.window.iter().copied().collect(),
            shadow_matches,
            shadow_mismatches: state.shadow.len() as u64 - shadow_matches,
        }
    }

    /// Clear all counters and the window
    ///
    /// Reserved for the coordinator, which resets when a migration starts or
    /// is re-armed.
    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        *state = RecorderState {
            window: VecDeque::with_capacity(self.window_size),
            ..RecorderState::default()
        };
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

fn counters_of(state: &RecorderState) -> MetricsCounters {
    MetricsCounters {
        total_requests: state.total_requests(),
        mock_requests: state.mock_requests,
        real_requests: state.real_requests,
        errors: state.errors,
        rollbacks: state.rollbacks,
        fallbacks: state.fallbacks,
    }
}
