// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::warn;
use troupe_store::Session;

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct SessionCreate {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Session>>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    Ok(Json(state.repo.list_sessions(&user.id).await?))
}

/// Create a session and eagerly provision its sandbox + file watcher.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<SessionCreate>>,
) -> Result<Json<Session>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let title = payload.and_then(|Json(p)| p.title);
    let session = state.repo.create_session(&user.id, title).await?;
    let instance = state
        .manager
        .ensure_session_container(&session.id, &user.id)
        .await?;
    state
        .watchers
        .ensure_watch(&session.id, instance.workspace_path.clone());
    Ok(Json(session))
}

pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    state
        .repo
        .get_session(&session_id, Some(&user.id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))
}

/// Delete the session and everything attached to it: sandbox container,
/// file watcher, context state and the stream buffer.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    if state
        .repo
        .get_session(&session_id, Some(&user.id))
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!("session {session_id} not found")));
    }
    state.watchers.stop_watch(&session_id);
    if let Err(err) = state.manager.destroy_session_container(&session_id).await {
        warn!(session = %session_id, "sandbox teardown failed during delete: {err}");
    }
    if let Err(err) = state.state_store.clear_session_state(&session_id) {
        warn!(session = %session_id, "context state cleanup failed: {err}");
    }
    state.streams.drop_session(&session_id);
    state.repo.delete_session(&session_id).await?;
    Ok(Json(serde_json::json!({ "deleted": session_id })))
}
