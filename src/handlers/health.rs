//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::coordinator::MigrationPhase;
use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// "operational", or "degraded" once any metrics write has failed
    pub metrics_recording_status: &'static str,
    pub phase: MigrationPhase,
    pub supervisor_running: bool,
}

/// Health check handler
///
/// Always 200 while the process serves requests; a degraded metrics status
/// means Prometheus counters may under-report.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics_recording_status = if state.metrics().metrics_recording_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            metrics_recording_status,
            phase: state.coordinator().snapshot().phase,
            supervisor_running: state.supervisor().is_running(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::test_state;

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = test_state();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.metrics_recording_status, "operational");
        assert_eq!(body.phase, MigrationPhase::Idle);
        assert!(!body.supervisor_running);
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_when_failures_occur() {
        let state = test_state();
        state.metrics().metrics_recording_failure("record_request");

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.metrics_recording_status, "degraded");
    }
}
