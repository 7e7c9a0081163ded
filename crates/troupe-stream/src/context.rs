// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use troupe_config::{AgentRole, SenderKind};
use troupe_store::Message;

use crate::events::{new_message_id, StreamEvent};

/// Transport-side fan-out for one session's events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: StreamEvent) -> anyhow::Result<()>;
}

/// Persistence callback for the event kinds that belong in the session
/// history.
#[async_trait]
pub trait MessagePersister: Send + Sync {
    async fn persist(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: Option<&str>,
    ) -> anyhow::Result<Message>;
}

/// Per-turn streaming state: the publisher, the persistence callback and the
/// list of messages persisted so far.
///
/// Constructed at the top of each turn and passed down explicitly; this is
/// the only place that appends to the turn's persisted-message list.
pub struct StreamContext {
    pub session_id: String,
    pub owner_id: String,
    publisher: Option<Arc<dyn EventSink>>,
    persister: Arc<dyn MessagePersister>,
    persisted: Mutex<Vec<Message>>,
}

impl StreamContext {
    pub fn new(
        session_id: impl Into<String>,
        owner_id: impl Into<String>,
        publisher: Option<Arc<dyn EventSink>>,
        persister: Arc<dyn MessagePersister>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            owner_id: owner_id.into(),
            publisher,
            persister,
            persisted: Mutex::new(Vec::new()),
        }
    }

    /// Send an event to the transport.  Without a registered publisher
    /// (pure batch) events are dropped silently; persistence is unaffected.
    pub async fn publish(&self, event: StreamEvent) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if let Err(err) = publisher.send(event).await {
            debug!(session = %self.session_id, "event publish failed: {err}");
        }
    }

    async fn persist(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: Option<&str>,
    ) -> anyhow::Result<Message> {
        let message = self
            .persister
            .persist(sender, agent, content, message_id)
            .await?;
        self.persisted
            .lock()
            .expect("persisted list poisoned")
            .push(message.clone());
        Ok(message)
    }

    /// Emit a mid-stream token chunk (`final=false`).  Never persisted.
    pub async fn emit_token_chunk(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: &str,
    ) {
        self.publish(StreamEvent::token(sender, agent, content, message_id, false))
            .await;
    }

    /// Emit the completed aggregate for a message id (`final=true`).  The
    /// aggregate is persisted only when `persist_final` is set.
    pub async fn emit_token_final(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: &str,
        persist_final: bool,
    ) -> anyhow::Result<Option<Message>> {
        self.publish(StreamEvent::token(sender, agent, content, message_id, true))
            .await;
        if !persist_final {
            return Ok(None);
        }
        let message = self
            .persist(sender, agent, content, Some(message_id))
            .await?;
        Ok(Some(message))
    }

    /// Emit and persist a user-visible progress note; returns its message id.
    pub async fn emit_status(
        &self,
        agent: Option<AgentRole>,
        content: &str,
    ) -> anyhow::Result<String> {
        let event = StreamEvent::status(agent, content);
        let message_id = event.message_id().map(str::to_string);
        self.publish(event).await;
        self.persist(SenderKind::Status, agent, content, message_id.as_deref())
            .await?;
        Ok(message_id.unwrap_or_default())
    }

    /// Emit and persist an unrecoverable failure notice.
    pub async fn emit_error(
        &self,
        agent: Option<AgentRole>,
        content: &str,
        message_id: Option<String>,
    ) -> anyhow::Result<String> {
        let event = StreamEvent::error(agent, content, message_id);
        let resolved = event
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(new_message_id);
        self.publish(event).await;
        self.persist(SenderKind::Status, agent, content, Some(&resolved))
            .await?;
        Ok(resolved)
    }

    /// Emit and persist a pre-composed final message.
    pub async fn emit_message(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: Option<&str>,
    ) -> anyhow::Result<Message> {
        let message = self.persist(sender, agent, content, message_id).await?;
        self.publish(StreamEvent::message(
            sender,
            agent,
            content,
            message.id.clone(),
            Some(message.timestamp.to_rfc3339()),
        ))
        .await;
        Ok(message)
    }

    /// Emit and persist an informational record of a tool invocation.
    pub async fn emit_tool_call(
        &self,
        agent: Option<AgentRole>,
        invoker: &str,
        tool: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let event = StreamEvent::tool_call(agent, invoker, tool, content);
        let message_id = event.message_id().map(str::to_string);
        self.publish(event).await;
        self.persist(SenderKind::Agent, agent, content, message_id.as_deref())
            .await?;
        Ok(())
    }

    /// Messages persisted by this turn so far, in persistence order.
    pub fn persisted_messages(&self) -> Vec<Message> {
        self.persisted
            .lock()
            .expect("persisted list poisoned")
            .clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    struct RecordingSink {
        events: Mutex<Vec<StreamEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&self, event: StreamEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct RecordingPersister;

    #[async_trait]
    impl MessagePersister for RecordingPersister {
        async fn persist(
            &self,
            sender: SenderKind,
            agent: Option<AgentRole>,
            content: &str,
            message_id: Option<&str>,
        ) -> anyhow::Result<Message> {
            Ok(Message {
                id: message_id.unwrap_or("generated").to_string(),
                session_id: "s1".into(),
                sender,
                agent,
                content: content.into(),
                timestamp: Utc::now(),
                metadata: None,
            })
        }
    }

    fn turn(sink: Option<Arc<RecordingSink>>) -> StreamContext {
        StreamContext::new(
            "s1",
            "owner-1",
            sink.map(|s| s as Arc<dyn EventSink>),
            Arc::new(RecordingPersister),
        )
    }

    #[tokio::test]
    async fn chunks_are_published_but_never_persisted() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let turn = turn(Some(sink.clone()));
        turn.emit_token_chunk(SenderKind::Agent, None, "partial", "m1")
            .await;
        assert_eq!(sink.events.lock().unwrap().len(), 1);
        assert!(turn.persisted_messages().is_empty());
    }

    #[tokio::test]
    async fn final_token_persists_only_when_requested() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let turn = turn(Some(sink.clone()));
        turn.emit_token_final(SenderKind::Agent, None, "full", "m1", false)
            .await
            .unwrap();
        assert!(turn.persisted_messages().is_empty());
        turn.emit_token_final(SenderKind::Agent, None, "full", "m1", true)
            .await
            .unwrap();
        let persisted = turn.persisted_messages();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, "m1");
        assert_eq!(persisted[0].content, "full");
    }

    #[tokio::test]
    async fn status_and_error_are_persisted() {
        let turn = turn(None);
        turn.emit_status(None, "working").await.unwrap();
        turn.emit_error(None, "broke", Some("e1".into()))
            .await
            .unwrap();
        let persisted = turn.persisted_messages();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].id, "e1");
        assert_eq!(persisted[1].sender, SenderKind::Status);
    }

    #[tokio::test]
    async fn missing_publisher_still_persists() {
        let turn = turn(None);
        turn.emit_message(SenderKind::User, None, "hi", Some("u1"))
            .await
            .unwrap();
        assert_eq!(turn.persisted_messages().len(), 1);
    }

    #[tokio::test]
    async fn tool_call_event_is_recorded() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let turn = turn(Some(sink.clone()));
        turn.emit_tool_call(Some(AgentRole::Engineer), "engineer", "file_write", "[tool call] file_write")
            .await
            .unwrap();
        assert_eq!(turn.persisted_messages().len(), 1);
        let events = sink.events.lock().unwrap();
        assert!(matches!(events[0], StreamEvent::ToolCall { .. }));
    }
}
