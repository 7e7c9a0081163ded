// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use troupe_config::AgentRole;
use troupe_stream::StreamContext;

use crate::ToolHook;

/// Default hook: records every tool invocation as a `tool_call` stream event
/// (and persisted message) on the active turn.
///
/// Calls whose parameters carry no session/owner are ignored — they do not
/// belong to a user-facing turn.
pub struct StreamToolCallHook;

#[async_trait]
impl ToolHook for StreamToolCallHook {
    async fn on_invoke(
        &self,
        tool_name: &str,
        params: &Value,
        turn: &StreamContext,
    ) -> anyhow::Result<()> {
        let session_id = params.get("session_id").and_then(Value::as_str);
        let owner_id = params.get("owner_id").and_then(Value::as_str);
        if session_id.is_none() || owner_id.is_none() {
            return Ok(());
        }
        let raw_agent = params.get("agent").and_then(Value::as_str);
        let agent = raw_agent.and_then(AgentRole::parse);
        let invoker = raw_agent.unwrap_or("tool");
        let content = format!("[tool call] {tool_name}");
        turn.emit_tool_call(agent, invoker, tool_name, &content)
            .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use troupe_config::SenderKind;
    use troupe_store::Message;
    use troupe_stream::MessagePersister;

    use super::*;

    struct NullPersister;

    #[async_trait]
    impl MessagePersister for NullPersister {
        async fn persist(
            &self,
            sender: SenderKind,
            agent: Option<AgentRole>,
            content: &str,
            message_id: Option<&str>,
        ) -> anyhow::Result<Message> {
            Ok(Message {
                id: message_id.unwrap_or("m").into(),
                session_id: "s1".into(),
                sender,
                agent,
                content: content.into(),
                timestamp: chrono::Utc::now(),
                metadata: None,
            })
        }
    }

    #[tokio::test]
    async fn records_a_tool_call_message() {
        let turn = StreamContext::new("s1", "o1", None, Arc::new(NullPersister));
        StreamToolCallHook
            .on_invoke(
                "file_write",
                &json!({"session_id": "s1", "owner_id": "o1", "agent": "engineer"}),
                &turn,
            )
            .await
            .unwrap();
        let persisted = turn.persisted_messages();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].content, "[tool call] file_write");
        assert_eq!(persisted[0].agent, Some(AgentRole::Engineer));
    }

    #[tokio::test]
    async fn skips_calls_without_session_scope() {
        let turn = StreamContext::new("s1", "o1", None, Arc::new(NullPersister));
        StreamToolCallHook
            .on_invoke("web_search", &json!({"query": "x"}), &turn)
            .await
            .unwrap();
        assert!(turn.persisted_messages().is_empty());
    }
}
