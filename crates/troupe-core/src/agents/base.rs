// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use futures::StreamExt;
use tracing::warn;
use troupe_config::{AgentRole, SenderKind};
use troupe_model::LlmService;
use troupe_store::{LlmInteraction, LlmLog};
use troupe_stream::StreamContext;
use troupe_tools::ToolExecutor;
use uuid::Uuid;

use crate::AgentError;

/// Shared dependencies injected into every agent invocation.
#[derive(Clone)]
pub struct AgentServices {
    pub llm: Arc<LlmService>,
    pub tools: Arc<ToolExecutor>,
    pub llm_log: Arc<LlmLog>,
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub role: AgentRole,
    pub sender: SenderKind,
    /// Aggregated final content (already streamed as the final token event).
    pub content: String,
    pub message_id: String,
    /// Tool invocations that failed during the run; lets the orchestrator
    /// record the action with failure status without parsing prose.
    pub tool_failures: u32,
}

pub(crate) struct StreamedRaw {
    pub raw: String,
    pub message_id: String,
}

/// Stream one LLM completion, publishing a non-final token event per chunk.
///
/// A provider failure — up front or mid-stream — emits a persisted `error`
/// event carrying the same message id and aborts with
/// [`AgentError::Provider`]; no final token event is emitted for that id.
pub(crate) async fn stream_raw(
    services: &AgentServices,
    turn: &StreamContext,
    role: AgentRole,
    sender: SenderKind,
    provider: &str,
    prompt: &str,
) -> Result<StreamedRaw, AgentError> {
    let message_id = Uuid::new_v4().to_string();
    let mut stream = match services.llm.stream_generate(Some(provider), prompt).await {
        Ok(stream) => stream,
        Err(err) => {
            emit_provider_error(turn, role, &err, &message_id).await;
            return Err(err.into());
        }
    };
    let mut chunks: Vec<String> = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                turn.emit_token_chunk(sender, Some(role), &chunk, &message_id)
                    .await;
                chunks.push(chunk);
            }
            Err(err) => {
                emit_provider_error(turn, role, &err, &message_id).await;
                return Err(err.into());
            }
        }
    }
    Ok(StreamedRaw {
        raw: chunks.concat(),
        message_id,
    })
}

async fn emit_provider_error(
    turn: &StreamContext,
    role: AgentRole,
    err: &troupe_model::LlmError,
    message_id: &str,
) {
    if let Err(persist_err) = turn
        .emit_error(Some(role), &err.to_string(), Some(message_id.to_string()))
        .await
    {
        warn!(session = %turn.session_id, "failed to persist provider error: {persist_err}");
    }
}

/// Complete an agent run: record the raw exchange in the LLM log, publish
/// the final (persisted) token event and build the run result.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn finalize(
    services: &AgentServices,
    turn: &StreamContext,
    role: AgentRole,
    sender: SenderKind,
    provider: &str,
    interaction: &str,
    prompt: &str,
    raw: String,
    final_text: String,
    message_id: String,
    tool_failures: u32,
) -> Result<AgentRunResult, AgentError> {
    let record = LlmInteraction {
        timestamp: String::new(),
        agent: role.as_str().to_string(),
        interaction: interaction.to_string(),
        provider: provider.to_string(),
        prompt: prompt.to_string(),
        raw_response: raw,
        final_response: final_text.clone(),
    };
    if let Err(err) = services.llm_log.record(&turn.session_id, record).await {
        warn!(session = %turn.session_id, "llm log append failed: {err}");
    }
    turn.emit_token_final(sender, Some(role), &final_text, &message_id, true)
        .await
        .map_err(AgentError::Internal)?;
    Ok(AgentRunResult {
        role,
        sender,
        content: final_text,
        message_id,
        tool_failures,
    })
}

/// First `max` characters with an ellipsis beyond.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}…")
}
