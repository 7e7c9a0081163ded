// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use troupe_config::{AgentRole, SenderKind};
use troupe_store::{AppendMessage, Message};
use troupe_stream::{SessionSink, StreamContext, StreamEvent};

use crate::runtime::RepoPersister;
use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatTurn {
    pub user: Message,
    pub responses: Vec<Message>,
}

/// Accept a user message and drive one full orchestrator turn.
///
/// The turn streams its events to any connected WebSocket subscribers; the
/// response body carries the user message plus everything the turn
/// persisted.  A provider failure persists an error status and returns 429.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MessageCreate>,
) -> Result<Json<ChatTurn>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    let session = state
        .repo
        .get_session(&payload.session_id, Some(&user.id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {} not found", payload.session_id)))?;

    let user_message = state
        .repo
        .append_message(AppendMessage {
            session_id: &payload.session_id,
            sender: SenderKind::User,
            agent: None,
            content: &payload.content,
            owner_id: Some(&user.id),
            message_id: payload.message_id.as_deref(),
        })
        .await?;
    state.streams.broadcast(
        &payload.session_id,
        StreamEvent::message(
            SenderKind::User,
            None,
            user_message.content.clone(),
            user_message.id.clone(),
            Some(user_message.timestamp.to_rfc3339()),
        ),
    );

    let turn = StreamContext::new(
        payload.session_id.clone(),
        session.owner_id.clone(),
        Some(Arc::new(SessionSink::new(
            state.streams.clone(),
            payload.session_id.clone(),
        ))),
        Arc::new(RepoPersister::new(
            state.repo.clone(),
            payload.session_id.clone(),
            session.owner_id.clone(),
        )),
    );

    match state
        .orchestrator
        .run_turn(&turn, &user.id, &payload.content)
        .await
    {
        Ok(responses) => Ok(Json(ChatTurn {
            user: user_message,
            responses,
        })),
        Err(err) => {
            let api_err = ApiError::from(err);
            if matches!(api_err, ApiError::LlmUnavailable(_)) {
                // Keep the failure visible in the history as well.
                let _ = state
                    .repo
                    .append_message(AppendMessage {
                        session_id: &payload.session_id,
                        sender: SenderKind::Status,
                        agent: Some(AgentRole::Planner),
                        content: &format!("llm provider failure: {api_err}"),
                        owner_id: Some(&session.owner_id),
                        message_id: None,
                    })
                    .await;
            }
            Err(api_err)
        }
    }
}

pub async fn fetch_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user = state.auth.authenticate(&headers)?;
    if state
        .repo
        .get_session(&session_id, Some(&user.id))
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!("session {session_id} not found")));
    }
    Ok(Json(state.repo.list_messages(&session_id, &user.id).await?))
}
