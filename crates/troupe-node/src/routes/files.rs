// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use troupe_sandbox::{FileContent, TreeNode};

use crate::{ApiError, AppState};

fn default_depth() -> usize {
    4
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    #[serde(default)]
    pub root: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub path: String,
}

pub async fn tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<TreeNode>>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let nodes = state
        .files
        .list_tree(
            &session_id,
            &user.id,
            &query.root,
            query.depth,
            query.include_hidden,
        )
        .await?;
    Ok(Json(nodes))
}

pub async fn content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<ContentQuery>,
) -> Result<Json<FileContent>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let file = state
        .files
        .read_file(&session_id, &user.id, &query.path)
        .await?;
    Ok(Json(file))
}
