// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::auth::{LoginRequest, TokenResponse, UserProfile};
use crate::{ApiError, AppState};

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    Ok(Json(state.auth.login(&payload)?))
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.auth.authenticate(&headers)?))
}
