//! Source routing override: `GET/PUT /admin/source`

use axum::{Json, extract::State};
use serde::Deserialize;

use super::AppState;
use super::extract::{AdminJson, Operator};
use crate::error::{AppError, AppResult};
use crate::source::{SourceMode, SourceSettings};

/// Body of `PUT /admin/source`; at least one field must be set
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceOverride {
    pub mode: Option<SourceMode>,
    pub fallback_enabled: Option<bool>,
}

pub async fn get_settings(State(state): State<AppState>, _operator: Operator) -> Json<SourceSettings> {
    Json(state.sources().config())
}

pub async fn put_settings(
    State(state): State<AppState>,
    operator: Operator,
    AdminJson(update): AdminJson<SourceOverride>,
) -> AppResult<Json<SourceSettings>> {
    if update.mode.is_none() && update.fallback_enabled.is_none() {
        return Err(AppError::Validation(
            "expected 'mode' and/or 'fallbackEnabled'".to_string(),
        ));
    }

    if let Some(mode) = update.mode {
        tracing::warn!(operator = %operator, mode = ?mode, "Source mode overridden");
        state.sources().set_mode(mode);
    }
    if let Some(enabled) = update.fallback_enabled {
        tracing::warn!(operator = %operator, fallback_enabled = enabled, "Fallback toggled");
        state.sources().set_fallback_enabled(enabled);
    }

    Ok(Json(state.sources().config()))
}
