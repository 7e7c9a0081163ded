// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use troupe_stream::StreamContext;

use crate::{Tool, ToolError, ToolHook};

/// Registry of tools plus an ordered chain of invocation hooks.
///
/// Initialised once at startup and shared process-wide behind an `Arc`.
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    hooks: Vec<Arc<dyn ToolHook>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            hooks: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn add_hook(&mut self, hook: impl ToolHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke a tool by name.  Hooks run first, in registration order; a
    /// failing hook is logged and the call proceeds.
    pub async fn run(
        &self,
        name: &str,
        params: Value,
        turn: &StreamContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        for hook in &self.hooks {
            if let Err(err) = hook.on_invoke(name, &params, turn).await {
                warn!(tool = %name, "tool hook failed: {err}");
            }
        }
        debug!(tool = %name, session = %turn.session_id, "running tool");
        tool.run(&params).await
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
