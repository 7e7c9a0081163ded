// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use troupe_sandbox::FileService;

use crate::params::{normalize_rel_path, require_str};
use crate::{Tool, ToolError};

/// Read a workspace file so an agent can inspect existing work.
pub struct FileReadTool {
    files: Arc<FileService>,
}

impl FileReadTool {
    pub fn new(files: Arc<FileService>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file from the session workspace."
    }

    async fn run(&self, params: &Value) -> Result<Value, ToolError> {
        let session_id = require_str(params, "session_id")?;
        let owner_id = require_str(params, "owner_id")?;
        let path = normalize_rel_path(&require_str(params, "path")?, None)?;
        let content = self
            .files
            .read_file(&session_id, &owner_id, &path)
            .await
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        let mut payload = serde_json::to_value(content)
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        payload["tool"] = json!(self.name());
        Ok(payload)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
