// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;
use troupe_config::{AgentRole, SenderKind};
use troupe_stream::StreamContext;

use crate::agents::base::{finalize, stream_raw, AgentRunResult, AgentServices};
use crate::context::AgentContextView;
use crate::prompts;
use crate::AgentError;

/// A planner call: the user-visible result plus the raw LLM text the
/// orchestrator scans for routing hints (the transform strips the JSON).
pub struct PlannerExchange {
    pub result: AgentRunResult,
    pub raw: String,
}

/// The coordinating role: picks the next agent, reviews each output and
/// writes the final summary.
pub struct Planner;

impl Planner {
    /// Ask which role should act first.
    pub async fn plan_next_agent(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        available: &[AgentRole],
    ) -> Result<PlannerExchange, AgentError> {
        let prompt = prompts::PLAN_TEMPLATE
            .replace("{context}", &view.composed_user_message())
            .replace("{available}", &prompts::describe_roles(available));
        self.exchange(services, turn, &prompt, "plan", format_plan_response)
            .await
    }

    /// Review a worker's output and pick the next role (or finish).
    pub async fn review_agent_output(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        role: AgentRole,
        output: &str,
        remaining: &[AgentRole],
    ) -> Result<PlannerExchange, AgentError> {
        let mut prompt = format!(
            "The user asked: {}\n\n{}",
            view.most_recent_user_message,
            prompts::REVIEW_TEMPLATE
                .replace("{role}", role.as_str())
                .replace("{output}", output)
        );
        if remaining.is_empty() {
            prompt.push_str(prompts::NO_REMAINING_NOTE);
        }
        self.exchange(services, turn, &prompt, "review", move |raw| {
            format_review_response(raw, role)
        })
        .await
    }

    /// Write the user-visible closing summary for the turn.
    pub async fn summarize_team(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        view: &AgentContextView,
        contributions: &[(AgentRole, String)],
    ) -> Result<AgentRunResult, AgentError> {
        let prompt = prompts::SUMMARY_TEMPLATE
            .replace("{context}", &view.most_recent_user_message)
            .replace("{contributions}", &render_contributions(contributions));
        let request = view.most_recent_user_message.clone();
        let exchange = self
            .exchange(services, turn, &prompt, "summary", move |raw| {
                format_summary_response(raw, &request)
            })
            .await?;
        Ok(exchange.result)
    }

    async fn exchange(
        &self,
        services: &AgentServices,
        turn: &StreamContext,
        prompt: &str,
        interaction: &str,
        transform: impl FnOnce(&str) -> String,
    ) -> Result<PlannerExchange, AgentError> {
        let provider = services
            .llm
            .provider_name_for(AgentRole::Planner)
            .to_string();
        let streamed = stream_raw(
            services,
            turn,
            AgentRole::Planner,
            SenderKind::Planner,
            &provider,
            prompt,
        )
        .await?;
        let raw = streamed.raw.clone();
        let final_text = transform(&streamed.raw);
        let result = finalize(
            services,
            turn,
            AgentRole::Planner,
            SenderKind::Planner,
            &provider,
            interaction,
            prompt,
            streamed.raw,
            final_text,
            streamed.message_id,
            0,
        )
        .await?;
        Ok(PlannerExchange { result, raw })
    }
}

/// First JSON object embedded in the text, if any.
pub(crate) fn extract_json_block(text: &str) -> Option<serde_json::Value> {
    let re = Regex::new(r"(?s)\{.*?\}").ok()?;
    let raw = re.find(text)?.as_str();
    serde_json::from_str(raw).ok()
}

fn format_plan_response(raw: &str) -> String {
    let Some(data) = extract_json_block(raw) else {
        return raw.trim().to_string();
    };
    let mut lines = vec!["## Team routing".to_string()];
    if let Some(next) = data.get("next_agent").and_then(|v| v.as_str()) {
        lines.push(format!("- next up: {next}"));
    }
    if let Some(reason) = data.get("reason").and_then(|v| v.as_str()) {
        lines.push(format!("- reason: {reason}"));
    }
    if lines.len() == 1 {
        return raw.trim().to_string();
    }
    lines.join("\n")
}

fn format_review_response(raw: &str, role: AgentRole) -> String {
    let Some(data) = extract_json_block(raw) else {
        return raw.trim().to_string();
    };
    let mut lines = vec![format!("## Review of {role}")];
    if let Some(decision) = data.get("decision").and_then(|v| v.as_str()) {
        lines.push(format!("- decision: {decision}"));
    }
    if let Some(next) = data.get("next_agent").and_then(|v| v.as_str()) {
        lines.push(format!("- next: {next}"));
    }
    if let Some(reason) = data.get("reason").and_then(|v| v.as_str()) {
        lines.push(format!("- notes: {reason}"));
    }
    if lines.len() == 1 {
        return raw.trim().to_string();
    }
    lines.join("\n")
}

fn format_summary_response(raw: &str, request: &str) -> String {
    let body = raw.trim();
    let mut lines = vec![
        "## Final report".to_string(),
        format!("**Request**: {}", request.trim()),
        String::new(),
        body.to_string(),
        String::new(),
        "Tell me if you want further changes and I will route the team again.".to_string(),
    ];
    lines.retain(|line| !line.trim().is_empty());
    lines.join("\n")
}

fn render_contributions(contributions: &[(AgentRole, String)]) -> String {
    if contributions.is_empty() {
        return "- no worker contributions (planner only)".to_string();
    }
    contributions
        .iter()
        .map(|(role, output)| {
            let snippet = crate::agents::base::truncate_chars(output.trim(), 400);
            format!("- {role}: {snippet}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
