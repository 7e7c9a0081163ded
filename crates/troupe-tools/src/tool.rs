// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use troupe_stream::StreamContext;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("parameter {name} is missing or invalid: {reason}")]
    BadParam { name: String, reason: String },
    #[error("tool {tool} failed: {message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    pub fn bad_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadParam {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Trait every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Execute the tool with JSON parameters.
    async fn run(&self, params: &Value) -> Result<Value, ToolError>;
}

/// Hook invoked before each tool call, in registration order.  Hook errors
/// are logged and never abort the call.
#[async_trait]
pub trait ToolHook: Send + Sync {
    async fn on_invoke(
        &self,
        tool_name: &str,
        params: &Value,
        turn: &StreamContext,
    ) -> anyhow::Result<()>;
}
