// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use troupe_sandbox::SandboxCommandService;

use crate::params::{optional_str, require_str};
use crate::{Tool, ToolError};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Run a shell command inside the session's sandbox container.
pub struct SandboxShellTool {
    commands: Arc<SandboxCommandService>,
}

impl SandboxShellTool {
    pub fn new(commands: Arc<SandboxCommandService>) -> Self {
        Self { commands }
    }

    fn parse_env(params: &Value) -> Result<BTreeMap<String, String>, ToolError> {
        let Some(raw) = params.get("env") else {
            return Ok(BTreeMap::new());
        };
        let Some(object) = raw.as_object() else {
            return Err(ToolError::bad_param("env", "expected an object"));
        };
        let mut env = BTreeMap::new();
        for (key, value) in object {
            let Some(text) = value.as_str() else {
                return Err(ToolError::bad_param("env", "values must be strings"));
            };
            env.insert(key.clone(), text.to_string());
        }
        Ok(env)
    }

    fn parse_timeout(params: &Value) -> Result<u64, ToolError> {
        match params.get("timeout") {
            None | Some(Value::Null) => Ok(DEFAULT_TIMEOUT_SECS),
            Some(value) => match value.as_u64() {
                Some(secs) if secs > 0 => Ok(secs),
                _ => Err(ToolError::bad_param("timeout", "expected a positive integer")),
            },
        }
    }
}

#[async_trait]
impl Tool for SandboxShellTool {
    fn name(&self) -> &str {
        "sandbox_shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command inside the sandbox container, with optional working directory, environment and timeout."
    }

    async fn run(&self, params: &Value) -> Result<Value, ToolError> {
        let session_id = require_str(params, "session_id")?;
        let owner_id = require_str(params, "owner_id")?;
        let command = require_str(params, "command")?;
        let cwd = optional_str(params, "cwd");
        let env = Self::parse_env(params)?;
        let timeout = Self::parse_timeout(params)?;

        let outcome = self
            .commands
            .run_command(
                &session_id,
                &owner_id,
                &command,
                cwd.as_deref(),
                &env,
                timeout,
            )
            .await
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        let mut payload = serde_json::to_value(outcome)
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        payload["tool"] = json!(self.name());
        Ok(payload)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use troupe_config::SandboxConfig;
    use troupe_sandbox::testing::StubRuntime;
    use troupe_sandbox::{ContainerManager, ExecOutput};

    use super::*;

    async fn tool(dir: &std::path::Path) -> (SandboxShellTool, Arc<StubRuntime>) {
        let mut config = SandboxConfig::default();
        config.base_path = dir.to_path_buf();
        let runtime = Arc::new(StubRuntime::new());
        let manager = Arc::new(
            ContainerManager::new(config, runtime.clone()).await.unwrap(),
        );
        (
            SandboxShellTool::new(Arc::new(SandboxCommandService::new(
                manager,
                runtime.clone(),
            ))),
            runtime,
        )
    }

    #[tokio::test]
    async fn runs_command_and_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, runtime) = tool(dir.path()).await;
        runtime.queue_exec(Ok(ExecOutput {
            exit_code: 2,
            stdout: "built\n".into(),
            stderr: "warn\n".into(),
        }));
        let result = tool
            .run(&json!({
                "session_id": "s1", "owner_id": "o1", "agent": "engineer",
                "command": "go build", "cwd": "app",
                "env": {"CGO_ENABLED": "0"}, "timeout": 60,
            }))
            .await
            .unwrap();
        assert_eq!(result["exit_code"], 2);
        assert_eq!(result["stdout"], "built\n");
        assert_eq!(result["command"], "go build");
    }

    #[tokio::test]
    async fn invalid_timeout_and_env_are_bad_params() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, _runtime) = tool(dir.path()).await;
        let err = tool
            .run(&json!({
                "session_id": "s1", "owner_id": "o1", "command": "ls", "timeout": 0,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadParam { .. }));
        let err = tool
            .run(&json!({
                "session_id": "s1", "owner_id": "o1", "command": "ls", "env": {"A": 1},
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadParam { .. }));
    }

    #[tokio::test]
    async fn empty_command_surfaces_as_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, _runtime) = tool(dir.path()).await;
        let err = tool
            .run(&json!({"session_id": "s1", "owner_id": "o1", "command": "ls"}))
            .await;
        assert!(err.is_ok());
        let err = tool
            .run(&json!({"session_id": "s1", "owner_id": "o1", "command": "  "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadParam { .. }));
    }
}
