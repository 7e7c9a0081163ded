// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use troupe_config::AgentRole;
use troupe_store::{
    ActionLogEntry, ActionStatus, Message, SessionStateStore, TodoEntry, ACTION_RESULT_CAP,
};
use troupe_stream::StreamContext;

use crate::agents::{
    extract_json_block, truncate_chars, AgentRunResult, AgentServices, Planner, RoleAgent,
};
use crate::context::{ContextBuilder, SessionContext};
use crate::AgentError;

/// Upper bound on worker dispatches within one turn.
pub const MAX_ITERATIONS: usize = 6;

const FINISH_TOKENS: [&str; 5] = ["finish", "done", "complete", "完成", "结束"];

/// Planner-led dynamic routing for one user turn.
///
/// The planner picks the first role, each dispatched role acts (streaming
/// through the turn's [`StreamContext`]), its outcome is recorded into the
/// session context, and the planner reviews and routes again until it says
/// finish or the iteration bound is hit.  The planner's summary is the
/// user-visible answer.
pub struct TeamOrchestrator {
    services: AgentServices,
    builder: ContextBuilder,
    state: Arc<SessionStateStore>,
    disabled_roles: Vec<AgentRole>,
}

impl TeamOrchestrator {
    pub fn new(
        services: AgentServices,
        builder: ContextBuilder,
        state: Arc<SessionStateStore>,
        disabled_roles: Vec<AgentRole>,
    ) -> Self {
        Self {
            services,
            builder,
            state,
            disabled_roles,
        }
    }

    /// Drive one full turn.  Returns the messages persisted during it, in
    /// order.  A provider failure has already been surfaced as an `error`
    /// event by the time it propagates out of here.
    pub async fn run_turn(
        &self,
        turn: &StreamContext,
        user_id: &str,
        user_message: &str,
    ) -> Result<Vec<Message>, AgentError> {
        let session_id = turn.session_id.clone();
        let owner_id = turn.owner_id.clone();
        let planner = Planner;

        let mut available: Vec<AgentRole> = AgentRole::DISPATCH_ORDER
            .iter()
            .copied()
            .filter(|role| !self.disabled_roles.contains(role))
            .collect();

        let mut context = self
            .builder
            .build(&session_id, &owner_id, user_id, user_message)
            .await;

        turn.emit_status(Some(AgentRole::Planner), "planner is evaluating the task")
            .await
            .context("emitting planning status")?;

        let plan = planner
            .plan_next_agent(
                &self.services,
                turn,
                &context.for_agent(AgentRole::Planner, None, None),
                &available,
            )
            .await?;
        let mut next = extract_agent_hint(&plan.raw, &available);

        let mut contributions: Vec<(AgentRole, String)> = Vec::new();
        let mut step: u32 = 0;
        while let Some(role) = next {
            if step as usize >= MAX_ITERATIONS {
                break;
            }
            step += 1;
            turn.emit_status(
                Some(AgentRole::Planner),
                &format!("planner delegates to {role}"),
            )
            .await
            .context("emitting delegation status")?;

            let agent = RoleAgent::new(role);
            let view = context.for_agent(role, None, None);
            let result = agent.act(&self.services, turn, &view).await?;

            self.record_step(&session_id, step, &context, &result)?;
            self.harvest_todos(&session_id, role, &result.content);
            contributions.push((role, result.content.clone()));
            available.retain(|r| *r != role);

            // History, artifacts and workspace may all have changed.
            context = self
                .builder
                .build(&session_id, &owner_id, user_id, user_message)
                .await;

            let review = planner
                .review_agent_output(
                    &self.services,
                    turn,
                    &context.for_agent(AgentRole::Planner, None, None),
                    role,
                    &result.content,
                    &available,
                )
                .await?;
            next = extract_agent_hint(&review.raw, &available);
        }

        turn.emit_status(Some(AgentRole::Planner), "planner is summarizing")
            .await
            .context("emitting summary status")?;
        planner
            .summarize_team(
                &self.services,
                turn,
                &context.for_agent(AgentRole::Planner, None, None),
                &contributions,
            )
            .await?;

        info!(session = %session_id, steps = step, "turn complete");
        Ok(turn.persisted_messages())
    }

    /// Record one worker step: full detail file, context snapshot, and a
    /// bounded action-log entry whose metadata points at both.
    fn record_step(
        &self,
        session_id: &str,
        step: u32,
        context: &SessionContext,
        result: &AgentRunResult,
    ) -> Result<(), AgentError> {
        let detail = json!({
            "agent": result.role.as_str(),
            "message_id": result.message_id,
            "content": result.content,
            "tool_failures": result.tool_failures,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let detail_path = self
            .state
            .persist_action_detail(session_id, step, &detail)
            .context("persisting step detail")?;
        let snapshot_path = self
            .state
            .persist_context_snapshot(session_id, step, context)
            .context("persisting context snapshot")?;

        let mut metadata = HashMap::new();
        metadata.insert(
            "summary_line".to_string(),
            json!(crate::context::compress_text(&result.content, 160)),
        );
        metadata.insert("step_id".to_string(), json!(step));
        metadata.insert(
            "detail_path".to_string(),
            json!(detail_path.to_string_lossy()),
        );
        metadata.insert(
            "context_snapshot_path".to_string(),
            json!(snapshot_path.to_string_lossy()),
        );
        let status = if result.tool_failures > 0 {
            ActionStatus::Failure
        } else {
            ActionStatus::Success
        };
        self.state
            .record_action(
                session_id,
                ActionLogEntry {
                    agent: result.role,
                    action: "act".into(),
                    result: truncate_chars(&result.content, ACTION_RESULT_CAP),
                    status,
                    timestamp: Some(Utc::now().to_rfc3339()),
                    metadata,
                },
            )
            .context("recording action")?;
        Ok(())
    }

    /// Harvest TODO lines from a worker's output into the bounded list.
    fn harvest_todos(&self, session_id: &str, role: AgentRole, content: &str) {
        for description in extract_todo_lines(content) {
            if let Err(err) = self
                .state
                .add_todo(session_id, TodoEntry::new(description, role.as_str()))
            {
                warn!(session = %session_id, "failed to record todo: {err}");
            }
        }
    }
}

/// Decide the next role from planner text.
///
/// Precedence: an embedded JSON `next_agent` (finish tokens and unknown
/// values mean stop, a known-but-unavailable role falls through), then the
/// first available role named anywhere in the text, then a bare finish
/// token, and finally the first available role as fail-safe progress.
fn extract_agent_hint(text: &str, candidates: &[AgentRole]) -> Option<AgentRole> {
    if candidates.is_empty() {
        return None;
    }
    if let Some(value) = parse_json_agent(text) {
        match normalize_agent(&value) {
            Some(role) if candidates.contains(&role) => return Some(role),
            Some(_) => {}
            None => return None,
        }
    }
    let lowered = text.to_lowercase();
    for candidate in candidates {
        if lowered.contains(candidate.as_str()) {
            return Some(*candidate);
        }
    }
    if contains_finish_token(&lowered) {
        return None;
    }
    Some(candidates[0])
}

fn parse_json_agent(text: &str) -> Option<String> {
    let data = extract_json_block(text)?;
    data.get("next_agent")
        .or_else(|| data.get("agent"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Map a planner-supplied agent value to a role.  Finish tokens and unknown
/// names both yield `None`.
fn normalize_agent(value: &str) -> Option<AgentRole> {
    let lowered = value.trim().to_lowercase();
    if lowered.is_empty() || FINISH_TOKENS.contains(&lowered.as_str()) {
        return None;
    }
    AgentRole::parse(&lowered)
}

fn contains_finish_token(lowered: &str) -> bool {
    FINISH_TOKENS.iter().any(|token| lowered.contains(token))
}

/// Lines prefixed by `todo:` (case-insensitive) or `- [ ]` become TODO
/// descriptions.
fn extract_todo_lines(content: &str) -> Vec<String> {
    let mut todos = Vec::new();
    for line in content.lines() {
        let stripped = line.trim();
        let description = if stripped.to_lowercase().starts_with("todo:") {
            stripped[5..].trim()
        } else if let Some(rest) = stripped.strip_prefix("- [ ]") {
            rest.trim()
        } else {
            continue;
        };
        if !description.is_empty() {
            todos.push(description.to_string());
        }
    }
    todos
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WORKERS: [AgentRole; 5] = AgentRole::DISPATCH_ORDER;

    #[test]
    fn json_hint_wins_when_role_is_available() {
        let text = "I pick {\"next_agent\": \"Engineer\", \"reason\": \"code\"}";
        assert_eq!(
            extract_agent_hint(text, &WORKERS),
            Some(AgentRole::Engineer)
        );
    }

    #[test]
    fn finish_in_json_stops_the_loop() {
        let text = "{\"next_agent\": \"finish\", \"decision\": \"finish\", \"reason\": \"done\"}";
        assert_eq!(extract_agent_hint(text, &WORKERS), None);
    }

    #[test]
    fn unknown_json_value_stops_the_loop() {
        let text = "{\"next_agent\": \"random-intern\"}";
        assert_eq!(extract_agent_hint(text, &WORKERS), None);
    }

    #[test]
    fn used_role_in_json_falls_through_to_name_scan() {
        let remaining = [AgentRole::Analyst];
        let text = "{\"next_agent\": \"engineer\"} but maybe the analyst should verify";
        assert_eq!(
            extract_agent_hint(text, &remaining),
            Some(AgentRole::Analyst)
        );
    }

    #[test]
    fn without_json_the_first_named_role_is_chosen() {
        let text = "I think the Architect should design this before the engineer builds it.";
        // Scan follows candidate order, not text order.
        assert_eq!(
            extract_agent_hint(text, &WORKERS),
            Some(AgentRole::Architect)
        );
    }

    #[test]
    fn bare_finish_token_stops() {
        assert_eq!(extract_agent_hint("we are DONE here", &WORKERS), None);
        assert_eq!(extract_agent_hint("任务已经完成", &WORKERS), None);
    }

    #[test]
    fn unparseable_text_falls_back_to_first_candidate() {
        assert_eq!(
            extract_agent_hint("hmm, unclear", &WORKERS),
            Some(AgentRole::Product)
        );
    }

    #[test]
    fn no_candidates_always_stops() {
        assert_eq!(extract_agent_hint("engineer please", &[]), None);
    }

    #[test]
    fn todo_lines_are_harvested() {
        let content = "\
Work done.
TODO: wire up CI
- [ ] add integration tests
- [x] already finished
todo:
plain line";
        assert_eq!(
            extract_todo_lines(content),
            vec!["wire up CI", "add integration tests"]
        );
    }
}
