// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use troupe_config::{AgentRole, SenderKind};

/// Maximum retained action-log entries per session (FIFO eviction).
pub const ACTION_LOG_CAP: usize = 10;
/// Maximum retained pending TODOs per session (FIFO eviction).
pub const TODO_CAP: usize = 20;
/// Short-result budget for an action-log entry.
pub const ACTION_RESULT_CAP: usize = 400;

/// A single chat message.  Append-only within its session; `content` is the
/// aggregate of all streamed tokens for the message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub sender: SenderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentRole>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    #[default]
    Success,
    Failure,
}

/// A bounded record of one agent's contribution to a turn.
///
/// `metadata` carries the compressed `summary_line`, the `step_id`, and the
/// on-disk paths of the step detail and context snapshot when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub agent: AgentRole,
    pub action: String,
    pub result: String,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

/// An important pending item surfaced during the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoEntry {
    pub description: String,
    pub owner: String,
    pub priority: String,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TodoEntry {
    pub fn new(description: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            owner: owner.into(),
            priority: "medium".into(),
            status: TodoStatus::Pending,
            timestamp: Some(Utc::now().to_rfc3339()),
            metadata: HashMap::new(),
        }
    }
}

/// The cross-turn slice of a session's context.  Everything else in the
/// per-turn `SessionContext` projection is re-collected on each iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub action_log: Vec<ActionLogEntry>,
    #[serde(default)]
    pub pending_todos: Vec<TodoEntry>,
    #[serde(default)]
    pub agent_specific: HashMap<AgentRole, serde_json::Value>,
}

impl SessionState {
    /// Append an action entry, evicting the oldest beyond the cap.
    pub fn push_action(&mut self, entry: ActionLogEntry) {
        self.action_log.push(entry);
        if self.action_log.len() > ACTION_LOG_CAP {
            let excess = self.action_log.len() - ACTION_LOG_CAP;
            self.action_log.drain(..excess);
        }
    }

    /// Append a TODO, evicting the oldest beyond the cap.
    pub fn push_todo(&mut self, todo: TodoEntry) {
        self.pending_todos.push(todo);
        if self.pending_todos.len() > TODO_CAP {
            let excess = self.pending_todos.len() - TODO_CAP;
            self.pending_todos.drain(..excess);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
