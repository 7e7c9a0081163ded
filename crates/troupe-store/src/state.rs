// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use troupe_config::AgentRole;

use crate::fsutil::write_json_atomic;
use crate::types::{ActionLogEntry, SessionState, TodoEntry};
use crate::StoreError;

/// File-backed store for cross-turn session context state.
///
/// Layout under the base directory:
/// - `<id>_context.json` — action log, pending TODOs, per-role data
/// - `<id>_steps/step_<n>.json` — full detail of one orchestrator step
/// - `<id>_context_snapshots/step_<n>.json` — the context as seen at a step
///
/// An in-memory cache avoids re-parsing JSON on every access; all disk
/// writes are atomic and happen inside the cache lock (small, synchronous
/// critical sections — no awaits).
pub struct SessionStateStore {
    base_dir: PathBuf,
    cache: Mutex<HashMap<String, SessionState>>,
}

impl SessionStateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}_context.json"))
    }

    fn step_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}_steps"))
    }

    fn snapshot_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}_context_snapshots"))
    }

    fn load_uncached(&self, session_id: &str) -> SessionState {
        let path = self.state_path(session_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => SessionState::default(),
        }
    }

    /// Current state for the session (cache-first).
    pub fn load_state(&self, session_id: &str) -> SessionState {
        let mut cache = self.cache.lock().expect("state cache poisoned");
        cache
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_uncached(session_id))
            .clone()
    }

    /// Replace the session state wholesale and write it to disk.
    pub fn persist_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().expect("state cache poisoned");
        write_json_atomic(&self.state_path(session_id), &state)?;
        cache.insert(session_id.to_string(), state);
        Ok(())
    }

    /// Append an action entry (bounded FIFO) and persist.
    pub fn record_action(
        &self,
        session_id: &str,
        entry: ActionLogEntry,
    ) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().expect("state cache poisoned");
        let state = cache
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_uncached(session_id));
        state.push_action(entry);
        write_json_atomic(&self.state_path(session_id), state)
    }

    /// Append a TODO (bounded FIFO) and persist.
    pub fn add_todo(&self, session_id: &str, todo: TodoEntry) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().expect("state cache poisoned");
        let state = cache
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_uncached(session_id));
        state.push_todo(todo);
        write_json_atomic(&self.state_path(session_id), state)
    }

    /// Store a role's private data slot and persist.
    pub fn put_agent_data(
        &self,
        session_id: &str,
        role: AgentRole,
        data: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().expect("state cache poisoned");
        let state = cache
            .entry(session_id.to_string())
            .or_insert_with(|| self.load_uncached(session_id));
        state.agent_specific.insert(role, data);
        write_json_atomic(&self.state_path(session_id), state)
    }

    /// Write the full detail payload for one orchestrator step and return
    /// its path (recorded in the action-log entry metadata).
    pub fn persist_action_detail<T: Serialize>(
        &self,
        session_id: &str,
        step_id: u32,
        payload: &T,
    ) -> Result<PathBuf, StoreError> {
        let path = self.step_dir(session_id).join(format!("step_{step_id}.json"));
        write_json_atomic(&path, payload)?;
        Ok(path)
    }

    /// Write a full context snapshot for one step and return its path.
    pub fn persist_context_snapshot<T: Serialize>(
        &self,
        session_id: &str,
        step_id: u32,
        snapshot: &T,
    ) -> Result<PathBuf, StoreError> {
        let path = self
            .snapshot_dir(session_id)
            .join(format!("step_{step_id}.json"));
        write_json_atomic(&path, snapshot)?;
        Ok(path)
    }

    /// Drop the cached state and erase the on-disk context file.
    pub fn clear_session_state(&self, session_id: &str) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().expect("state cache poisoned");
        cache.remove(session_id);
        let path = self.state_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use troupe_config::AgentRole;

    use super::*;
    use crate::types::{ActionStatus, ACTION_LOG_CAP};

    fn entry(result: &str) -> ActionLogEntry {
        ActionLogEntry {
            agent: AgentRole::Engineer,
            action: "act".into(),
            result: result.into(),
            status: ActionStatus::Success,
            timestamp: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn record_action_persists_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStateStore::new(dir.path()).unwrap();
        for n in 0..12 {
            store.record_action("s1", entry(&format!("r{n}"))).unwrap();
        }
        // A fresh store reads the same file back.
        let fresh = SessionStateStore::new(dir.path()).unwrap();
        let state = fresh.load_state("s1");
        assert_eq!(state.action_log.len(), ACTION_LOG_CAP);
        assert_eq!(state.action_log.last().unwrap().result, "r11");
    }

    #[test]
    fn clear_removes_cache_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStateStore::new(dir.path()).unwrap();
        store.record_action("s1", entry("x")).unwrap();
        store.clear_session_state("s1").unwrap();
        assert!(store.load_state("s1").action_log.is_empty());
        assert!(!dir.path().join("s1_context.json").exists());
    }

    #[test]
    fn step_artifacts_land_in_per_session_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStateStore::new(dir.path()).unwrap();
        let detail = store
            .persist_action_detail("s1", 2, &serde_json::json!({"output": "full"}))
            .unwrap();
        let snapshot = store
            .persist_context_snapshot("s1", 2, &serde_json::json!({"history": ""}))
            .unwrap();
        assert!(detail.ends_with("s1_steps/step_2.json"));
        assert!(snapshot.ends_with("s1_context_snapshots/step_2.json"));
        assert!(detail.exists());
        assert!(snapshot.exists());
    }

    #[test]
    fn corrupt_state_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s1_context.json"), "not json").unwrap();
        let store = SessionStateStore::new(dir.path()).unwrap();
        assert!(store.load_state("s1").action_log.is_empty());
    }

    #[test]
    fn agent_data_is_keyed_by_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStateStore::new(dir.path()).unwrap();
        store
            .put_agent_data("s1", AgentRole::Product, serde_json::json!({"k": 1}))
            .unwrap();
        let state = store.load_state("s1");
        assert!(state.agent_specific.contains_key(&AgentRole::Product));
        assert!(!state.agent_specific.contains_key(&AgentRole::Engineer));
    }
}
