// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use troupe_config::{AgentRole, SenderKind};
use uuid::Uuid;

/// Events broadcast to session subscribers.
///
/// `token` carries either an in-progress chunk (`final=false`) or the
/// completed aggregate (`final=true`); only the latter is ever persisted.
/// `status`, `error`, `message` and `tool_call` are persisted; `file_change`
/// only triggers client-side refreshes and never reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: String,
        message_id: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    Status {
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: String,
        message_id: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    Error {
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: String,
        message_id: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    Message {
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: String,
        message_id: String,
        #[serde(rename = "final")]
        is_final: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    ToolCall {
        sender: SenderKind,
        agent: Option<AgentRole>,
        /// Role or tool name that triggered the call, for display.
        invoker: String,
        tool: String,
        content: String,
        message_id: String,
        #[serde(rename = "final")]
        is_final: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    FileChange {
        paths: Vec<String>,
    },
}

impl StreamEvent {
    pub fn token(
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: impl Into<String>,
        message_id: impl Into<String>,
        is_final: bool,
    ) -> Self {
        Self::Token {
            sender,
            agent,
            content: content.into(),
            message_id: message_id.into(),
            is_final,
        }
    }

    /// Status notes display stage progress or shell execution logs; the
    /// sender is always `status`.
    pub fn status(agent: Option<AgentRole>, content: impl Into<String>) -> Self {
        Self::Status {
            sender: SenderKind::Status,
            agent,
            content: content.into(),
            message_id: new_message_id(),
            is_final: true,
        }
    }

    pub fn error(
        agent: Option<AgentRole>,
        content: impl Into<String>,
        message_id: Option<String>,
    ) -> Self {
        Self::Error {
            sender: SenderKind::Status,
            agent,
            content: content.into(),
            message_id: message_id.unwrap_or_else(new_message_id),
            is_final: true,
        }
    }

    pub fn message(
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: impl Into<String>,
        message_id: impl Into<String>,
        timestamp: Option<String>,
    ) -> Self {
        Self::Message {
            sender,
            agent,
            content: content.into(),
            message_id: message_id.into(),
            is_final: true,
            timestamp: Some(normalize_timestamp(timestamp.as_deref())),
        }
    }

    pub fn tool_call(
        agent: Option<AgentRole>,
        invoker: impl Into<String>,
        tool: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            sender: SenderKind::Agent,
            agent,
            invoker: invoker.into(),
            tool: tool.into(),
            content: content.into(),
            message_id: new_message_id(),
            is_final: true,
            timestamp: Some(normalize_timestamp(None)),
        }
    }

    pub fn file_change(paths: Vec<String>) -> Self {
        Self::FileChange { paths }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Token { message_id, .. }
            | Self::Status { message_id, .. }
            | Self::Error { message_id, .. }
            | Self::Message { message_id, .. }
            | Self::ToolCall { message_id, .. } => Some(message_id),
            Self::FileChange { .. } => None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Token { content, .. }
            | Self::Status { content, .. }
            | Self::Error { content, .. }
            | Self::Message { content, .. }
            | Self::ToolCall { content, .. } => Some(content),
            Self::FileChange { .. } => None,
        }
    }
}

pub(crate) fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accept a caller-supplied RFC 3339 timestamp when it parses; otherwise
/// stamp with "now".  Keeps wire timestamps uniformly ISO-8601.
pub fn normalize_timestamp(value: Option<&str>) -> String {
    if let Some(raw) = value {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return parsed.with_timezone(&Utc).to_rfc3339();
        }
    }
    Utc::now().to_rfc3339()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
