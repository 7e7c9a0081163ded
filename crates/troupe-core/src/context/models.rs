// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::Serialize;
use troupe_config::AgentRole;
use troupe_store::{ActionLogEntry, TodoEntry, TodoStatus};

/// The per-turn structured memory: persistent state (action log, TODOs,
/// per-role data) combined with freshly collected history, artifacts and
/// workspace overview.  Rebuilt by the context builder on every iteration
/// and cheap to clone — no long-lived references leak out of a turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionContext {
    pub session_id: String,
    pub owner_id: String,
    pub user_id: String,
    /// Most recent user messages, oldest first.
    pub user_messages: Vec<String>,
    pub most_recent_user_message: String,
    /// Condensed digest of recent steps.
    pub conversation_history: String,
    /// Recent artifact paths harvested from message history.
    pub artifacts: String,
    /// Bounded workspace file overview.
    pub files_overview: String,
    pub action_log: Vec<ActionLogEntry>,
    pub pending_todos: Vec<TodoEntry>,
    /// Private per-role slots; never shared across roles.
    pub agent_specific: HashMap<AgentRole, serde_json::Value>,
}

impl SessionContext {
    /// Project this context for one role: all shared fields plus the role's
    /// private slot merged with optional overrides.
    pub fn for_agent(
        &self,
        role: AgentRole,
        system_prompt: Option<String>,
        overrides: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> AgentContextView {
        let mut agent_data = match self.agent_specific.get(&role) {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Some(extra) = overrides {
            agent_data.extend(extra);
        }
        AgentContextView {
            role,
            session_id: self.session_id.clone(),
            owner_id: self.owner_id.clone(),
            user_id: self.user_id.clone(),
            user_messages: self.user_messages.clone(),
            most_recent_user_message: self.most_recent_user_message.clone(),
            system_prompt,
            history: self.conversation_history.clone(),
            artifacts: self.artifacts.clone(),
            files_overview: self.files_overview.clone(),
            action_log: self.action_log.clone(),
            pending_todos: self.pending_todos.clone(),
            agent_data,
        }
    }
}

/// The slice of context a single role agent sees.
#[derive(Debug, Clone)]
pub struct AgentContextView {
    pub role: AgentRole,
    pub session_id: String,
    pub owner_id: String,
    pub user_id: String,
    pub user_messages: Vec<String>,
    pub most_recent_user_message: String,
    pub system_prompt: Option<String>,
    pub history: String,
    pub artifacts: String,
    pub files_overview: String,
    pub action_log: Vec<ActionLogEntry>,
    pub pending_todos: Vec<TodoEntry>,
    pub agent_data: serde_json::Map<String, serde_json::Value>,
}

impl AgentContextView {
    /// Assemble the user-message side of the prompt from the shared context
    /// sections and the role's private hints.
    pub fn composed_user_message(&self) -> String {
        let mut sections: Vec<String> = Vec::new();
        if !self.history.is_empty() {
            sections.push(format!("## Recent steps\n{}", self.history));
        }
        if !self.artifacts.is_empty() {
            sections.push(format!("## Recent artifacts\n{}", self.artifacts));
        }
        if !self.files_overview.is_empty() {
            sections.push(format!("## Workspace files\n{}", self.files_overview));
        }
        let pending: Vec<String> = self
            .pending_todos
            .iter()
            .filter(|t| t.status != TodoStatus::Done)
            .map(|t| format!("- ({}) {} [{}]", t.priority, t.description, t.owner))
            .collect();
        if !pending.is_empty() {
            sections.push(format!("## Pending TODOs\n{}", pending.join("\n")));
        }
        if !self.agent_data.is_empty() {
            let hints: Vec<String> = self
                .agent_data
                .iter()
                .map(|(key, value)| format!("- {key}: {value}"))
                .collect();
            sections.push(format!("## Role notes\n{}", hints.join("\n")));
        }
        sections.push(format!("## Request\n{}", self.most_recent_user_message));
        sections.join("\n\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
