// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent session storage.
//!
//! Three stores share one base directory:
//! - [`SessionRepository`] — sessions and their append-only message logs
//!   (`<id>.json` plus an owner-indexed `index.json`);
//! - [`SessionStateStore`] — the cross-turn context state (action log,
//!   pending TODOs, per-role data) plus per-step details and snapshots;
//! - [`LlmLog`] — the append-only record of raw agent/LLM exchanges.
//!
//! Every multi-field file is written atomically (temp file + rename).

mod fsutil;
mod llm_log;
mod repository;
mod state;
mod types;

pub use fsutil::write_json_atomic;
pub use llm_log::{LlmInteraction, LlmLog};
pub use repository::{
    AppendMessage, FileSessionRepository, InMemorySessionRepository, SessionRepository,
};
pub use state::SessionStateStore;
pub use types::{
    ActionLogEntry, ActionStatus, Message, Session, SessionState, TodoEntry, TodoStatus,
    ACTION_LOG_CAP, ACTION_RESULT_CAP, TODO_CAP,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
