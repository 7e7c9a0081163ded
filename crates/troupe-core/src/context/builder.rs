// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::debug;
use troupe_config::SenderKind;
use troupe_sandbox::{FileService, TreeNode};
use troupe_store::{SessionRepository, SessionStateStore};

use super::SessionContext;

const HISTORY_LIMIT: usize = 8;
const FILE_LIMIT: usize = 6;
const ARTIFACT_LIMIT: usize = 5;
const SUMMARY_CAP: usize = 160;

/// Suffixes that make a bare token look like a file path.
const PATH_SUFFIXES: &[&str] = &[
    ".py", ".ts", ".tsx", ".js", ".jsx", ".json", ".md", ".txt", ".yml", ".yaml", ".toml",
    ".lock", ".cfg", ".ini", ".css", ".scss", ".html", ".rs", ".go", ".java", ".kt", ".sh",
];

/// Builds the per-turn [`SessionContext`] projection from persistent state
/// plus freshly collected history, workspace overview and artifacts.
pub struct ContextBuilder {
    repo: Arc<dyn SessionRepository>,
    files: Arc<FileService>,
    state: Arc<SessionStateStore>,
}

impl ContextBuilder {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        files: Arc<FileService>,
        state: Arc<SessionStateStore>,
    ) -> Self {
        Self { repo, files, state }
    }

    pub async fn build(
        &self,
        session_id: &str,
        owner_id: &str,
        user_id: &str,
        user_message: &str,
    ) -> SessionContext {
        let history = self.collect_action_timeline(session_id, HISTORY_LIMIT);
        let files_overview = self.collect_file_overview(session_id, owner_id, FILE_LIMIT).await;
        let artifacts = self
            .collect_recent_artifacts(session_id, owner_id, ARTIFACT_LIMIT)
            .await;
        let mut user_messages = self
            .collect_user_messages(session_id, owner_id, HISTORY_LIMIT)
            .await;
        let trimmed_input = user_message.trim().to_string();
        if !trimmed_input.is_empty() {
            user_messages.push(trimmed_input.clone());
            if user_messages.len() > HISTORY_LIMIT {
                let excess = user_messages.len() - HISTORY_LIMIT;
                user_messages.drain(..excess);
            }
        }
        let most_recent_user_message = if trimmed_input.is_empty() {
            user_messages.last().cloned().unwrap_or_default()
        } else {
            trimmed_input
        };

        let state = self.state.load_state(session_id);
        debug!(session = %session_id, "session context assembled");
        SessionContext {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            user_id: user_id.to_string(),
            user_messages,
            most_recent_user_message,
            conversation_history: history,
            artifacts,
            files_overview,
            action_log: state.action_log,
            pending_todos: state.pending_todos,
            agent_specific: state.agent_specific,
        }
    }

    /// Digest of the most recent action-log entries, one line per step.
    fn collect_action_timeline(&self, session_id: &str, limit: usize) -> String {
        let state = self.state.load_state(session_id);
        if state.action_log.is_empty() {
            return String::new();
        }
        let start = state.action_log.len().saturating_sub(limit);
        let mut lines = Vec::new();
        for entry in &state.action_log[start..] {
            let summary = entry
                .metadata
                .get("summary_line")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| compress_text(&entry.result, SUMMARY_CAP));
            let step = entry
                .metadata
                .get("step_id")
                .and_then(|v| v.as_u64())
                .map(|id| format!("step {id}"))
                .unwrap_or_else(|| format!("step {}", lines.len() + 1));
            let detail = entry
                .metadata
                .get("detail_path")
                .and_then(|v| v.as_str())
                .map(|p| format!(" (detail: {p})"))
                .unwrap_or_default();
            lines.push(format!("{step} · {}: {summary}{detail}", entry.agent));
        }
        lines.join("\n")
    }

    /// Bounded flat listing of workspace files.
    async fn collect_file_overview(
        &self,
        session_id: &str,
        owner_id: &str,
        limit: usize,
    ) -> String {
        let tree = match self
            .files
            .list_tree(session_id, owner_id, "", 4, false)
            .await
        {
            Ok(tree) => tree,
            Err(_) => return String::new(),
        };
        let mut entries = Vec::new();
        flatten_files(&tree, limit, &mut entries);
        if entries.is_empty() {
            return String::new();
        }
        entries
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn collect_user_messages(
        &self,
        session_id: &str,
        owner_id: &str,
        limit: usize,
    ) -> Vec<String> {
        let Ok(messages) = self.repo.list_messages(session_id, owner_id).await else {
            return Vec::new();
        };
        let mut user_lines: Vec<String> = messages
            .iter()
            .filter(|m| m.sender == SenderKind::User)
            .map(|m| m.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if user_lines.len() > limit {
            let excess = user_lines.len() - limit;
            user_lines.drain(..excess);
        }
        user_lines
    }

    /// Scan message history in reverse for write-report sections
    /// (`[file writes]`, `[PRD writes]`, ...) and collect their paths.
    async fn collect_recent_artifacts(
        &self,
        session_id: &str,
        owner_id: &str,
        limit: usize,
    ) -> String {
        let Ok(messages) = self.repo.list_messages(session_id, owner_id).await else {
            return String::new();
        };
        let mut artifacts = Vec::new();
        for message in messages.iter().rev() {
            if artifacts.len() >= limit {
                break;
            }
            for entry in extract_artifact_entries(&message.content) {
                artifacts.push(entry);
                if artifacts.len() >= limit {
                    break;
                }
            }
        }
        if artifacts.is_empty() {
            return String::new();
        }
        artifacts
            .iter()
            .map(|a| format!("- {a}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn flatten_files(nodes: &[TreeNode], limit: usize, out: &mut Vec<String>) {
    for node in nodes {
        if out.len() >= limit {
            return;
        }
        if node.kind == "file" {
            out.push(format!("{} (size {})", node.path, node.size));
        }
        if let Some(children) = &node.children {
            flatten_files(children, limit, out);
        }
    }
}

/// Collapse whitespace and truncate with an ellipsis.
pub(crate) fn compress_text(text: &str, max_len: usize) -> String {
    let cleaned: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return "no output".to_string();
    }
    if cleaned.chars().count() > max_len {
        let cut: String = cleaned.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        cleaned
    }
}

/// Pull `label: path` entries out of a message containing write-report
/// sections of the form:
///
/// ```text
/// [file writes]
/// - src/main.go
/// ```
fn extract_artifact_entries(content: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current_label: Option<&str> = None;
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        if stripped.starts_with('[') {
            current_label = (stripped.ends_with("writes]")).then_some(stripped);
            continue;
        }
        let Some(label) = current_label else {
            continue;
        };
        let Some(item) = stripped.strip_prefix('-') else {
            current_label = None;
            continue;
        };
        if let Some(path) = normalize_artifact_line(item.trim()) {
            entries.push(format!("{label}: {path}"));
        }
    }
    entries
}

fn normalize_artifact_line(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let mut target = text;
    if let Some((_, maybe_path)) = text.split_once(": ") {
        let maybe_path = maybe_path.trim();
        if looks_like_path(maybe_path) {
            target = maybe_path;
        } else if !looks_like_path(target) {
            return None;
        }
    }
    if !looks_like_path(target) {
        return None;
    }
    let cleaned = target.split(" (").next().unwrap_or(target).trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn looks_like_path(value: &str) -> bool {
    if value.contains('/') {
        return true;
    }
    let lowered = value.to_lowercase();
    PATH_SUFFIXES.iter().any(|suffix| lowered.ends_with(suffix))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use troupe_config::{AgentRole, SandboxConfig};
    use troupe_sandbox::testing::StubRuntime;
    use troupe_sandbox::ContainerManager;
    use troupe_store::{
        ActionLogEntry, ActionStatus, AppendMessage, InMemorySessionRepository,
    };

    use super::*;

    async fn builder(dir: &std::path::Path) -> (ContextBuilder, Arc<InMemorySessionRepository>) {
        let mut config = SandboxConfig::default();
        config.base_path = dir.to_path_buf();
        let manager = Arc::new(
            ContainerManager::new(config, Arc::new(StubRuntime::new()))
                .await
                .unwrap(),
        );
        let repo = Arc::new(InMemorySessionRepository::new());
        let builder = ContextBuilder::new(
            repo.clone(),
            Arc::new(FileService::new(manager)),
            Arc::new(SessionStateStore::new(dir.join("state")).unwrap()),
        );
        (builder, repo)
    }

    #[test]
    fn compress_text_collapses_and_truncates() {
        assert_eq!(compress_text("  a\n  b   c ", 160), "a b c");
        assert_eq!(compress_text("", 160), "no output");
        let long = "x".repeat(200);
        let compressed = compress_text(&long, 160);
        assert_eq!(compressed.chars().count(), 160);
        assert!(compressed.ends_with("..."));
    }

    #[test]
    fn artifact_entries_need_a_writes_label() {
        let content = "\
summary text
[file writes]
- src/main.go
- not a path
[notes]
- docs/ignored.md
";
        let entries = extract_artifact_entries(content);
        assert_eq!(entries, vec!["[file writes]: src/main.go"]);
    }

    #[test]
    fn artifact_lines_strip_size_annotations_and_prefixes() {
        let content = "[PRD writes]\n- wrote: docs/prd.md (size 120)\n";
        let entries = extract_artifact_entries(content);
        assert_eq!(entries, vec!["[PRD writes]: docs/prd.md"]);
    }

    #[test]
    fn bare_tokens_qualify_by_suffix() {
        assert!(looks_like_path("main.rs"));
        assert!(looks_like_path("a/b"));
        assert!(!looks_like_path("hello world"));
    }

    #[tokio::test]
    async fn build_combines_state_history_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, repo) = builder(dir.path()).await;
        let session = repo.create_session("o1", None).await.unwrap();
        repo.append_message(AppendMessage {
            session_id: &session.id,
            sender: SenderKind::User,
            agent: None,
            content: "first ask",
            owner_id: None,
            message_id: None,
        })
        .await
        .unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("summary_line".to_string(), serde_json::json!("wrote the PRD"));
        metadata.insert("step_id".to_string(), serde_json::json!(1));
        builder
            .state
            .record_action(
                &session.id,
                ActionLogEntry {
                    agent: AgentRole::Product,
                    action: "act".into(),
                    result: "long output".into(),
                    status: ActionStatus::Success,
                    timestamp: None,
                    metadata,
                },
            )
            .unwrap();

        let ctx = builder.build(&session.id, "o1", "u1", "second ask").await;
        assert_eq!(ctx.user_messages, vec!["first ask", "second ask"]);
        assert_eq!(ctx.most_recent_user_message, "second ask");
        assert_eq!(ctx.conversation_history, "step 1 · product: wrote the PRD");
        assert_eq!(ctx.action_log.len(), 1);
    }

    #[tokio::test]
    async fn files_overview_lists_workspace_files() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, repo) = builder(dir.path()).await;
        let session = repo.create_session("o1", None).await.unwrap();
        builder
            .files
            .write_file(&session.id, "o1", "src/app.ts", "x", true, false)
            .await
            .unwrap();
        let ctx = builder.build(&session.id, "o1", "u1", "hello").await;
        assert!(ctx.files_overview.contains("src/app.ts (size 1)"));
    }

    #[tokio::test]
    async fn artifacts_come_from_recent_messages_in_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, repo) = builder(dir.path()).await;
        let session = repo.create_session("o1", None).await.unwrap();
        repo.append_message(AppendMessage {
            session_id: &session.id,
            sender: SenderKind::Agent,
            agent: Some(AgentRole::Engineer),
            content: "done\n\n[file writes]\n- src/main.go\n- src/util.go\n",
            owner_id: None,
            message_id: None,
        })
        .await
        .unwrap();
        let ctx = builder.build(&session.id, "o1", "u1", "next").await;
        assert!(ctx.artifacts.contains("[file writes]: src/main.go"));
        assert!(ctx.artifacts.contains("[file writes]: src/util.go"));
    }
}
