// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use troupe_sandbox::CommandOutcome;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SessionTarget {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    pub session_id: String,
    pub container_id: String,
    pub ports: BTreeMap<u16, u16>,
    pub preview: BTreeMap<u16, String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub session_id: String,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

pub async fn launch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SessionTarget>,
) -> Result<Json<LaunchResponse>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let instance = state
        .manager
        .ensure_session_container(&payload.session_id, &user.id)
        .await?;
    state
        .watchers
        .ensure_watch(&payload.session_id, instance.workspace_path.clone());
    let preview = state.manager.preview_urls(&instance);
    Ok(Json(LaunchResponse {
        session_id: instance.session_id,
        container_id: instance.container_id,
        ports: instance.port_map,
        preview,
    }))
}

pub async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SessionTarget>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.authenticate(&headers)?;
    state.watchers.stop_watch(&payload.session_id);
    let destroyed = state
        .manager
        .destroy_session_container(&payload.session_id)
        .await?;
    Ok(Json(serde_json::json!({ "destroyed": destroyed })))
}

pub async fn destroy_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let stopped = state.manager.destroy_all(Some(&user.id)).await?;
    for session_id in &stopped {
        state.watchers.stop_watch(session_id);
    }
    Ok(Json(serde_json::json!({ "destroyed": stopped })))
}

pub async fn exec(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ExecRequest>,
) -> Result<Json<CommandOutcome>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let outcome = state
        .commands
        .run_command(
            &payload.session_id,
            &user.id,
            &payload.command,
            payload.cwd.as_deref(),
            &payload.env.unwrap_or_default(),
            payload.timeout.unwrap_or(300),
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<BTreeMap<u16, String>>, ApiError> {
    state.auth.authenticate(&headers)?;
    let instance = state
        .manager
        .get_instance(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no sandbox for session {session_id}")))?;
    Ok(Json(state.manager.preview_urls(&instance)))
}
