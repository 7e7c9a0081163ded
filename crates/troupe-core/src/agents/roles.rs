// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;
use serde_json::json;
use troupe_config::{AgentRole, SenderKind};
use troupe_stream::StreamContext;
use troupe_tools::ToolError;

use crate::agents::base::{finalize, stream_raw, truncate_chars, AgentRunResult, AgentServices};
use crate::blocks::{extract_file_blocks, extract_shell_blocks, WriteMode};
use crate::context::AgentContextView;
use crate::prompts;
use crate::AgentError;

/// Output budget for per-command status events.
const STATUS_OUTPUT_CAP: usize = 400;

/// A worker role.  All six roles share the same `act` contract; the
/// differences — research pre-step, reference injection, file writes, shell
/// execution — are keyed off the role.
pub struct RoleAgent {
    role: AgentRole,
}

impl RoleAgent {
    pub fn new(role: AgentRole) -> Self {
        Self { role }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    fn does_research(&self) -> bool {
        matches!(self.role, AgentRole::Product | AgentRole::Researcher)
    }

    fn writes_files(&self) -> bool {
        !matches!(self.role, AgentRole::Analyst | AgentRole::Planner)
    }

    fn write_report_label(&self) -> &'static str {
        match self.role {
            AgentRole::Engineer => "[file writes]",
            AgentRole::Product => "[PRD writes]",
            AgentRole::Architect => "[architecture doc writes]",
            _ => "[research doc writes]",
        }
    }

    /// Run the role for one turn iteration.
    pub async fn act(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
    ) -> Result<AgentRunResult, AgentError> {
        let mut tool_failures: u32 = 0;

        let research = if self.does_research() {
            self.collect_research(services, turn, view, &mut tool_failures)
                .await
        } else {
            String::new()
        };

        let system = view
            .system_prompt
            .clone()
            .unwrap_or_else(|| prompts::system_prompt(self.role, &research));
        let prompt = format!("{system}\n\n{}", view.composed_user_message());

        let provider = services.llm.provider_name_for(self.role).to_string();
        let streamed = stream_raw(
            services,
            turn,
            self.role,
            SenderKind::Agent,
            &provider,
            &prompt,
        )
        .await?;
        let raw = streamed.raw;

        let references = self
            .inject_references(services, turn, view, &raw, &mut tool_failures)
            .await;
        let mut summary = if references.is_empty() {
            raw.clone()
        } else {
            format!("{references}\n\n{raw}")
        };

        if self.writes_files() {
            let applied = self
                .apply_file_blocks(services, turn, view, &raw, &mut tool_failures)
                .await;
            if !applied.is_empty() {
                summary.push_str(&format!(
                    "\n\n{}\n{}",
                    self.write_report_label(),
                    applied
                        .iter()
                        .map(|p| format!("- {p}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
            }
        }

        if self.role == AgentRole::Engineer {
            let executed = self
                .run_shell_blocks(services, turn, view, &raw, &mut tool_failures)
                .await;
            if !executed.is_empty() {
                summary.push_str(&format!(
                    "\n\n[sandbox shell]\n{}",
                    executed
                        .iter()
                        .map(|c| format!("- {c}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
            }
        }

        finalize(
            services,
            turn,
            self.role,
            SenderKind::Agent,
            &provider,
            "act",
            &prompt,
            raw,
            summary,
            streamed.message_id,
            tool_failures,
        )
        .await
    }

    /// Pre-step web search for the roles that ground their output in
    /// external sources.  Failures degrade to a note in the prompt.
    async fn collect_research(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        tool_failures: &mut u32,
    ) -> String {
        let params = json!({
            "session_id": view.session_id,
            "owner_id": view.owner_id,
            "agent": self.role.as_str(),
            "query": view.most_recent_user_message,
            "max_results": 3,
        });
        match services.tools.run("web_search", params, turn).await {
            Ok(payload) => {
                let Some(results) = payload.get("results").and_then(|r| r.as_array()) else {
                    return "(no citable external results found)".to_string();
                };
                let lines: Vec<String> = results
                    .iter()
                    .take(3)
                    .map(|item| {
                        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled");
                        let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
                        let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
                        format!("- {title}: {snippet} (source: {url})")
                    })
                    .collect();
                if lines.is_empty() {
                    "(no citable external results found)".to_string()
                } else {
                    lines.join("\n")
                }
            }
            Err(err) => {
                *tool_failures += 1;
                format!("(web_search failed: {err})")
            }
        }
    }

    /// Resolve `{{read_file:path}}` directives (and, for the architect,
    /// path-looking tokens from the shared context) into a reference section
    /// prepended to the final message.
    async fn inject_references(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        raw: &str,
        tool_failures: &mut u32,
    ) -> String {
        let mut paths = extract_read_directives(raw);
        if self.role == AgentRole::Architect {
            for path in discover_shared_paths(view) {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        if paths.is_empty() {
            return String::new();
        }
        let mut snippets = Vec::new();
        for path in paths {
            let params = json!({
                "session_id": view.session_id,
                "owner_id": view.owner_id,
                "agent": self.role.as_str(),
                "path": path,
            });
            match services.tools.run("file_read", params, turn).await {
                Ok(payload) => {
                    if let Some(content) = payload.get("content").and_then(|v| v.as_str()) {
                        if !content.trim().is_empty() {
                            snippets.push(format!("### Reference {path}\n{}", content.trim()));
                        }
                    }
                }
                Err(err) => {
                    *tool_failures += 1;
                    snippets.push(format!("### Reference {path} unavailable\nreason: {err}"));
                }
            }
        }
        snippets.join("\n\n")
    }

    /// Apply the file blocks in the raw output through the file-write tool.
    /// Returns one report line per block.
    async fn apply_file_blocks(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        raw: &str,
        tool_failures: &mut u32,
    ) -> Vec<String> {
        let mut applied = Vec::new();
        for block in extract_file_blocks(raw) {
            let params = json!({
                "session_id": view.session_id,
                "owner_id": view.owner_id,
                "agent": self.role.as_str(),
                "path": block.path,
                "content": block.content,
                "append": block.mode == WriteMode::Append,
                "overwrite": block.mode == WriteMode::Overwrite,
            });
            match services.tools.run("file_write", params, turn).await {
                Ok(payload) => {
                    let path = payload
                        .get("path")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&block.path);
                    applied.push(path.to_string());
                }
                Err(err) => {
                    *tool_failures += 1;
                    applied.push(format!("{} (failed: {err})", block.path));
                }
            }
        }
        applied
    }

    /// Execute the shell blocks in the raw output, emitting one status event
    /// per command with exit code and truncated output.
    async fn run_shell_blocks(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        raw: &str,
        tool_failures: &mut u32,
    ) -> Vec<String> {
        let mut executed = Vec::new();
        for block in extract_shell_blocks(raw) {
            let mut params = json!({
                "session_id": view.session_id,
                "owner_id": view.owner_id,
                "agent": self.role.as_str(),
                "command": block.command,
            });
            if let Some(cwd) = &block.cwd {
                params["cwd"] = json!(cwd);
            }
            if let Some(timeout) = block.timeout {
                params["timeout"] = json!(timeout);
            }
            if !block.env.is_empty() {
                params["env"] = json!(block.env);
            }
            match services.tools.run("sandbox_shell", params, turn).await {
                Ok(payload) => {
                    let exit_code = payload
                        .get("exit_code")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(-1);
                    let stdout = payload.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
                    let stderr = payload.get("stderr").and_then(|v| v.as_str()).unwrap_or("");
                    let mut status = format!("$ {} (exit {exit_code})", block.command);
                    if !stdout.trim().is_empty() {
                        status.push_str(&format!(
                            "\nstdout: {}",
                            truncate_chars(stdout.trim(), STATUS_OUTPUT_CAP)
                        ));
                    }
                    if !stderr.trim().is_empty() {
                        status.push_str(&format!(
                            "\nstderr: {}",
                            truncate_chars(stderr.trim(), STATUS_OUTPUT_CAP)
                        ));
                    }
                    self.emit_shell_status(turn, &status).await;
                    executed.push(format!("{} (exit {exit_code})", block.command));
                }
                Err(err) => {
                    *tool_failures += 1;
                    self.emit_shell_status(
                        turn,
                        &format!("$ {} failed: {err}", block.command),
                    )
                    .await;
                    executed.push(format!("{} (failed: {})", block.command, short_error(&err)));
                }
            }
        }
        executed
    }

    async fn emit_shell_status(&self, turn: &StreamContext, status: &str) {
        if let Err(err) = turn.emit_status(Some(self.role), status).await {
            tracing::warn!(session = %turn.session_id, "failed to persist shell status: {err}");
        }
    }
}

fn short_error(err: &ToolError) -> String {
    truncate_chars(&err.to_string(), 200)
}

/// `{{read_file:path}}` directives, in order of appearance.
fn extract_read_directives(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"\{\{read_file:([^}]+)\}\}") else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Path-looking tokens from the artifacts and history digests, so the
/// architect reads what the team already produced.
fn discover_shared_paths(view: &AgentContextView) -> Vec<String> {
    let mut paths = Vec::new();
    for line in view.artifacts.lines().chain(view.history.lines()) {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        let candidate = stripped
            .trim_start_matches('-')
            .rsplit(':')
            .next()
            .unwrap_or("")
            .trim();
        let candidate = candidate.split(" (").next().unwrap_or(candidate).trim();
        if candidate.is_empty() {
            continue;
        }
        let is_path = candidate.contains('/')
            || candidate.ends_with(".md")
            || candidate.ends_with(".txt");
        if is_path && !paths.contains(&candidate.to_string()) {
            paths.push(candidate.to_string());
        }
    }
    paths
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
