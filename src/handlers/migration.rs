//! Migration admin endpoints
//!
//! - `GET /admin/migration` current status
//! - `POST /admin/migration` start, rollback, abort or reset
//! - `DELETE /admin/migration` emergency abort followed by reset
//! - `GET /admin/migration/events` rollback audit log
//! - `GET /admin/migration/stream` status snapshots as Server-Sent Events
//!
//! Every endpoint requires the `x-operator` header.

use axum::{
    Json,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;

use super::AppState;
use super::extract::{AdminJson, Operator};
use crate::coordinator::{MigrationStatus, RollbackEvent};
use crate::error::AppResult;

/// Body of `POST /admin/migration`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum MigrationCommand {
    Start {
        #[serde(default)]
        force: bool,
    },
    Rollback,
    Abort {
        #[serde(default)]
        reason: String,
    },
    Reset,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmergencyResetParams {
    pub reason: Option<String>,
}

pub async fn status(State(state): State<AppState>, _operator: Operator) -> Json<MigrationStatus> {
    Json(state.coordinator().status())
}

pub async fn command(
    State(state): State<AppState>,
    operator: Operator,
    AdminJson(command): AdminJson<MigrationCommand>,
) -> AppResult<Json<MigrationStatus>> {
    tracing::info!(operator = %operator, command = ?command, "Migration command received");

    let status = match command {
        MigrationCommand::Start { force } => state.supervisor().start_migration(force).await?,
        MigrationCommand::Rollback => state.coordinator().rollback().await?,
        MigrationCommand::Abort { reason } => {
            let reason = match reason.trim() {
                "" => format!("abort by {}", operator),
                given => given.to_string(),
            };
            state.coordinator().abort(&reason).await
        }
        MigrationCommand::Reset => state.coordinator().reset().await?,
    };

    Ok(Json(status))
}

pub async fn emergency_reset(
    State(state): State<AppState>,
    operator: Operator,
    Query(params): Query<EmergencyResetParams>,
) -> Json<MigrationStatus> {
    let reason = params
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| format!("emergency reset by {}", operator));

    tracing::warn!(operator = %operator, reason = %reason, "Emergency reset requested");
    // The tick loop exits on its own once the inactive snapshot is published
    Json(state.coordinator().emergency_reset(&reason).await)
}

pub async fn events(State(state): State<AppState>, _operator: Operator) -> Json<Vec<RollbackEvent>> {
    Json(state.coordinator().rollback_events())
}

/// Stream every published snapshot, starting with the current one
pub async fn stream(
    State(state): State<AppState>,
    operator: Operator,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(operator = %operator, "Status stream opened");
    let receiver = state.coordinator().subscribe();

    let events = futures::stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first && receiver.changed().await.is_err() {
            return None;
        }
        let snapshot = std::sync::Arc::clone(&receiver.borrow_and_update());
        let event = Event::default()
            .event("status")
            .json_data(&*snapshot)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok::<_, Infallible>(event), (receiver, false)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
