// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use troupe_config::{AgentRole, SenderKind};
use uuid::Uuid;

use crate::fsutil::write_json_atomic;
use crate::types::{Message, Session};
use crate::StoreError;

/// Parameters for appending a message to a session.
#[derive(Debug, Clone)]
pub struct AppendMessage<'a> {
    pub session_id: &'a str,
    pub sender: SenderKind,
    pub agent: Option<AgentRole>,
    pub content: &'a str,
    pub owner_id: Option<&'a str>,
    /// Client-supplied id; a fresh UUID is minted when absent.
    pub message_id: Option<&'a str>,
}

/// Abstract session + message store.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(
        &self,
        owner_id: &str,
        title: Option<String>,
    ) -> Result<Session, StoreError>;

    async fn get_session(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<Session>, StoreError>;

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<Session>, StoreError>;

    async fn list_messages(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    async fn append_message(&self, req: AppendMessage<'_>) -> Result<Message, StoreError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;
}

fn placeholder_title(session_id: &str) -> String {
    format!("Session {}", &session_id[..session_id.len().min(8)])
}

fn build_message(req: &AppendMessage<'_>) -> Message {
    Message {
        id: req
            .message_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        session_id: req.session_id.to_string(),
        sender: req.sender,
        agent: req.agent,
        content: req.content.to_string(),
        timestamp: Utc::now(),
        metadata: None,
    }
}

/// Adopt the first user message as the session title while the stored title
/// still carries the creation placeholder.  The literal "Session " prefix
/// check is intentional.
fn adopt_title(session: &mut Session, sender: SenderKind, content: &str) {
    if session.title.starts_with("Session ") && sender == SenderKind::User {
        let adopted: String = content.chars().take(60).collect();
        if !adopted.is_empty() {
            session.title = adopted;
        }
    }
}

// ─── In-memory implementation (tests, SESSION_STORAGE_BACKEND=memory) ────────

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_session(
        &self,
        owner_id: &str,
        title: Option<String>,
    ) -> Result<Session, StoreError> {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            id: session_id.clone(),
            owner_id: owner_id.to_string(),
            title: title.filter(|t| !t.is_empty()).unwrap_or_else(|| placeholder_title(&session_id)),
            created_at: Utc::now(),
            messages: Vec::new(),
        };
        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), session.clone());
        debug!(session = %session_id, owner = %owner_id, "created in-memory session");
        Ok(session)
    }

    async fn get_session(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(session_id).cloned();
        Ok(session.filter(|s| owner_id.map_or(true, |o| s.owner_id == o)))
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .get_session(session_id, Some(owner_id))
            .await?
            .map(|s| s.messages)
            .unwrap_or_default())
    }

    async fn append_message(&self, req: AppendMessage<'_>) -> Result<Message, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(req.session_id)
            .filter(|s| req.owner_id.map_or(true, |o| s.owner_id == o))
            .ok_or_else(|| StoreError::SessionNotFound(req.session_id.to_string()))?;
        adopt_title(session, req.sender, req.content);
        let message = build_message(&req);
        session.messages.push(message.clone());
        Ok(message)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.lock().await.remove(session_id);
        Ok(())
    }
}

// ─── File-backed implementation ──────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct OwnerIndex {
    #[serde(default)]
    owners: HashMap<String, Vec<String>>,
}

/// One JSON file per session plus an owner-indexed `index.json`.  A single
/// repository-wide mutex guards both; the store is sparse-I/O bound, not a
/// hot path.
pub struct FileSessionRepository {
    base_path: PathBuf,
    state: Mutex<OwnerIndex>,
}

impl FileSessionRepository {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        let index = Self::load_index(&base_path.join("index.json"));
        Ok(Self {
            base_path,
            state: Mutex::new(index),
        })
    }

    fn load_index(path: &PathBuf) -> OwnerIndex {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => OwnerIndex::default(),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.base_path.join("index.json")
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join(format!("{session_id}.json"))
    }

    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        write_json_atomic(&self.session_path(&session.id), session)
    }

    fn load_session(&self, session_id: &str) -> Option<Session> {
        let raw = std::fs::read_to_string(self.session_path(session_id)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_index(&self, index: &OwnerIndex) -> Result<(), StoreError> {
        write_json_atomic(&self.index_path(), index)
    }
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn create_session(
        &self,
        owner_id: &str,
        title: Option<String>,
    ) -> Result<Session, StoreError> {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            id: session_id.clone(),
            owner_id: owner_id.to_string(),
            title: title.filter(|t| !t.is_empty()).unwrap_or_else(|| placeholder_title(&session_id)),
            created_at: Utc::now(),
            messages: Vec::new(),
        };
        let mut index = self.state.lock().await;
        self.save_session(&session)?;
        index
            .owners
            .entry(owner_id.to_string())
            .or_default()
            .insert(0, session_id.clone());
        self.write_index(&index)?;
        info!(session = %session_id, owner = %owner_id, "created file-backed session");
        Ok(session)
    }

    async fn get_session(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<Session>, StoreError> {
        let _guard = self.state.lock().await;
        let session = self.load_session(session_id);
        Ok(session.filter(|s| owner_id.map_or(true, |o| s.owner_id == o)))
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<Session>, StoreError> {
        let index = self.state.lock().await;
        let session_ids = index.owners.get(owner_id).cloned().unwrap_or_default();
        let mut sessions = Vec::new();
        for session_id in session_ids {
            if let Some(mut session) = self.load_session(&session_id) {
                if session.title.starts_with("Session ") {
                    if let Some(first_user) = session
                        .messages
                        .iter()
                        .find(|m| m.sender == SenderKind::User)
                    {
                        let adopted: String = first_user.content.chars().take(60).collect();
                        if !adopted.is_empty() {
                            session.title = adopted;
                        }
                    }
                }
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    async fn list_messages(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .get_session(session_id, Some(owner_id))
            .await?
            .map(|s| s.messages)
            .unwrap_or_default())
    }

    async fn append_message(&self, req: AppendMessage<'_>) -> Result<Message, StoreError> {
        let _guard = self.state.lock().await;
        let mut session = self
            .load_session(req.session_id)
            .filter(|s| req.owner_id.map_or(true, |o| s.owner_id == o))
            .ok_or_else(|| StoreError::SessionNotFound(req.session_id.to_string()))?;
        adopt_title(&mut session, req.sender, req.content);
        let message = build_message(&req);
        session.messages.push(message.clone());
        self.save_session(&session)?;
        debug!(message = %message.id, sender = ?req.sender, session = %req.session_id, "persisted message");
        Ok(message)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut index = self.state.lock().await;
        let path = self.session_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        for sessions in index.owners.values_mut() {
            sessions.retain(|id| id != session_id);
        }
        self.write_index(&index)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
