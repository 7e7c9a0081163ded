// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use troupe_core::AgentError;
use troupe_sandbox::{FileAccessError, SandboxError};
use troupe_store::StoreError;

/// Error surface of the HTTP API.  Kind names are the contract; the wire
/// representation is a status code plus a short `detail` string.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid or missing credentials")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    LlmUnavailable(String),
    #[error("{0}")]
    Sandbox(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::LlmUnavailable(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Sandbox(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("api error: {self}");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => ApiError::NotFound(format!("session {id} not found")),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Timeout(secs) => {
                ApiError::Timeout(format!("command timed out after {secs}s"))
            }
            SandboxError::EmptyCommand | SandboxError::InvalidTimeout => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Sandbox(other.to_string()),
        }
    }
}

impl From<FileAccessError> for ApiError {
    fn from(err: FileAccessError) -> Self {
        match err {
            FileAccessError::NotFound => ApiError::NotFound("file not found".into()),
            FileAccessError::InvalidDepth
            | FileAccessError::PathEscape
            | FileAccessError::TooManyEntries
            | FileAccessError::IsDirectory
            | FileAccessError::AlreadyExists
            | FileAccessError::InvalidPath(_)
            | FileAccessError::Validation(_) => ApiError::BadRequest(err.to_string()),
            FileAccessError::Sandbox(inner) => inner.into(),
            FileAccessError::Io(inner) => ApiError::Internal(inner.into()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Provider(inner) => ApiError::LlmUnavailable(inner.to_string()),
            AgentError::Internal(inner) => ApiError::Internal(inner),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
