// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use troupe_config::{AgentRole, SenderKind};
use troupe_store::{AppendMessage, Message, SessionRepository};
use troupe_stream::MessagePersister;

/// Persistence callback for one turn: appends to the session's message log.
pub struct RepoPersister {
    repo: Arc<dyn SessionRepository>,
    session_id: String,
    owner_id: String,
}

impl RepoPersister {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        session_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            session_id: session_id.into(),
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl MessagePersister for RepoPersister {
    async fn persist(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: Option<&str>,
    ) -> anyhow::Result<Message> {
        let message = self
            .repo
            .append_message(AppendMessage {
                session_id: &self.session_id,
                sender,
                agent,
                content,
                owner_id: Some(&self.owner_id),
                message_id,
            })
            .await?;
        Ok(message)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
