//! Error types for phaseshift
//!
//! All errors implement `IntoResponse` for Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::coordinator::MigrationPhase;
use crate::source::SourceKind;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Cannot {action} while migration is in phase {phase}")]
    InvalidStateTransition {
        action: &'static str,
        phase: MigrationPhase,
    },

    #[error("Preflight checks failed: {}", .failures.join("; "))]
    PreflightFailed { failures: Vec<String> },

    #[error("{source_kind} source unavailable: {reason}")]
    SourceUnavailable {
        source_kind: SourceKind,
        reason: String,
    },

    #[error("Missing operator identity (expected '{header}' header)")]
    Unauthenticated { header: &'static str },

    #[error("Admin API request failed: {0}")]
    AdminApi(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            Self::PreflightFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Self::SourceUnavailable { .. } | Self::AdminApi(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "error": self.to_string(),
        });
        if let Self::PreflightFailed { failures } = &self {
            body["failures"] = serde_json::json!(failures);
        }

        (status, Json(body)).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_creates() {
        let err = AppError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_invalid_transition_message_names_action_and_phase() {
        let err = AppError::InvalidStateTransition {
            action: "start",
            phase: MigrationPhase::Canary25,
        };
        assert_eq!(
            err.to_string(),
            "Cannot start while migration is in phase canary25"
        );
    }

    #[test]
    fn test_preflight_failed_lists_every_failure() {
        let err = AppError::PreflightFailed {
            failures: vec![
                "connectivity: connection refused".to_string(),
                "credentials: REAL_SOURCE_TOKEN not set".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("connectivity: connection refused"));
        assert!(msg.contains("credentials: REAL_SOURCE_TOKEN not set"));
    }

    #[test]
    fn test_invalid_transition_response_status() {
        let err = AppError::InvalidStateTransition {
            action: "rollback",
            phase: MigrationPhase::Idle,
        };
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_preflight_failed_response_status() {
        let err = AppError::PreflightFailed {
            failures: vec!["capacity".to_string()],
        };
        assert_eq!(err.into_response().status(), StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn test_source_unavailable_response_status() {
        let err = AppError::SourceUnavailable {
            source_kind: SourceKind::Real,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "real source unavailable: timeout");
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unauthenticated_response_status() {
        let err = AppError::Unauthenticated {
            header: "x-operator",
        };
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_validation_error_response_status() {
        let err = AppError::Validation("test".to_string());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_response_status() {
        let err = AppError::Internal("test".to_string());
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
