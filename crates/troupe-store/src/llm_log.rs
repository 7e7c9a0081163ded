// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fsutil::write_json_atomic;
use crate::StoreError;

/// One raw agent↔LLM exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteraction {
    pub timestamp: String,
    pub agent: String,
    /// Interaction kind: "act", "plan", "review", "summary".
    pub interaction: String,
    pub provider: String,
    pub prompt: String,
    pub raw_response: String,
    pub final_response: String,
}

/// Append-only per-session log of LLM interactions
/// (`<base>/<session>_llm.json`).
///
/// Appends from concurrent turns of the same session are serialised by a
/// per-session async lock; the read-modify-write itself runs on the blocking
/// pool.
pub struct LlmLog {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LlmLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("llm log lock table poisoned");
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}_llm.json"))
    }

    pub async fn record(
        &self,
        session_id: &str,
        mut interaction: LlmInteraction,
    ) -> Result<(), StoreError> {
        if interaction.timestamp.is_empty() {
            interaction.timestamp = Utc::now().to_rfc3339();
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        let path = self.log_path(session_id);
        tokio::task::spawn_blocking(move || append_entry(&path, interaction))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    pub async fn read(&self, session_id: &str) -> Result<Vec<LlmInteraction>, StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        let path = self.log_path(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(_) => Ok(Vec::new()),
        }
    }
}

fn append_entry(path: &PathBuf, entry: LlmInteraction) -> Result<(), StoreError> {
    let mut existing: Vec<LlmInteraction> = match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    existing.push(entry);
    write_json_atomic(path, &existing)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
