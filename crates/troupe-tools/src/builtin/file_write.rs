// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use troupe_config::AgentRole;
use troupe_sandbox::FileService;

use crate::params::{normalize_rel_path, optional_str, require_str};
use crate::{Tool, ToolError};

/// Write or append a file inside the session workspace.
///
/// Non-engineering roles may only produce documentation: their writes are
/// coerced under `docs/` unless already there.
pub struct FileWriteTool {
    files: Arc<FileService>,
}

impl FileWriteTool {
    pub fn new(files: Arc<FileService>) -> Self {
        Self { files }
    }

    fn docs_root_for(agent: Option<&str>) -> Option<&'static str> {
        match agent.and_then(AgentRole::parse) {
            Some(AgentRole::Product | AgentRole::Architect | AgentRole::Researcher) => {
                Some("docs")
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write or append a file in the session workspace and report the resulting path."
    }

    async fn run(&self, params: &Value) -> Result<Value, ToolError> {
        let session_id = require_str(params, "session_id")?;
        let owner_id = require_str(params, "owner_id")?;
        let agent = optional_str(params, "agent");
        let raw_path = require_str(params, "path")?;
        let path = normalize_rel_path(&raw_path, Self::docs_root_for(agent.as_deref()))?;
        let content = match params.get("content") {
            None => "",
            Some(Value::String(text)) => text.as_str(),
            Some(_) => {
                return Err(ToolError::bad_param("content", "expected a string"));
            }
        };
        let overwrite = params
            .get("overwrite")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let append = params
            .get("append")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let outcome = self
            .files
            .write_file(&session_id, &owner_id, &path, content, overwrite, append)
            .await
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        let mut payload =
            serde_json::to_value(outcome).map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        payload["tool"] = json!(self.name());
        Ok(payload)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use troupe_sandbox::testing::StubRuntime;
    use troupe_sandbox::ContainerManager;
    use troupe_config::SandboxConfig;

    use super::*;

    async fn tool(dir: &std::path::Path) -> FileWriteTool {
        let mut config = SandboxConfig::default();
        config.base_path = dir.to_path_buf();
        let manager = Arc::new(
            ContainerManager::new(config, Arc::new(StubRuntime::new()))
                .await
                .unwrap(),
        );
        FileWriteTool::new(Arc::new(FileService::new(manager)))
    }

    #[tokio::test]
    async fn engineer_writes_anywhere_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path()).await;
        let result = tool
            .run(&json!({
                "session_id": "s1", "owner_id": "o1", "agent": "engineer",
                "path": "src/main.go", "content": "package main",
            }))
            .await
            .unwrap();
        assert_eq!(result["path"], "src/main.go");
        assert_eq!(result["tool"], "file_write");
        assert_eq!(result["created"], true);
    }

    #[tokio::test]
    async fn product_writes_are_coerced_under_docs() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path()).await;
        let result = tool
            .run(&json!({
                "session_id": "s1", "owner_id": "o1", "agent": "product",
                "path": "prd.md", "content": "# PRD",
            }))
            .await
            .unwrap();
        assert_eq!(result["path"], "docs/prd.md");
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path()).await;
        let err = tool
            .run(&json!({
                "session_id": "s1", "owner_id": "o1", "agent": "engineer",
                "path": "../secrets", "content": "x",
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("path must not contain .."));
    }

    #[tokio::test]
    async fn missing_session_scope_is_a_bad_param() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path()).await;
        let err = tool
            .run(&json!({"path": "a.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadParam { .. }));
    }
}
