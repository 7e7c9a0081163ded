// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::manager::ContainerManager;
use crate::runtime::ContainerRuntime;
use crate::SandboxError;

/// Workspace mount point inside every sandbox container.
const WORKSPACE_MOUNT: &str = "/workspace";

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes shell commands inside a session's sandbox container.
pub struct SandboxCommandService {
    manager: Arc<ContainerManager>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl SandboxCommandService {
    pub fn new(manager: Arc<ContainerManager>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { manager, runtime }
    }

    /// Run `command` under a login shell inside the container after changing
    /// into the resolved working directory.  A relative `cwd` is joined
    /// under the workspace mount; an absolute one is taken as-is.
    pub async fn run_command(
        &self,
        session_id: &str,
        owner_id: &str,
        command: &str,
        cwd: Option<&str>,
        env: &BTreeMap<String, String>,
        timeout_secs: u64,
    ) -> Result<CommandOutcome, SandboxError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }
        if timeout_secs == 0 {
            return Err(SandboxError::InvalidTimeout);
        }
        let instance = self
            .manager
            .ensure_session_container(session_id, owner_id)
            .await?;
        self.manager.mark_active(session_id).await?;

        let workdir = resolve_workdir(cwd);
        let final_command = format!("cd {} && {command}", shell_quote(&workdir));
        debug!(session = %session_id, cmd = %command, cwd = %workdir, "sandbox exec");
        let env_pairs: Vec<(String, String)> = env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let output = self
            .runtime
            .exec(
                &instance.container_name,
                &final_command,
                &env_pairs,
                timeout_secs,
            )
            .await?;
        self.manager.mark_active(session_id).await?;
        Ok(CommandOutcome {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn resolve_workdir(cwd: Option<&str>) -> String {
    match cwd.map(str::trim).filter(|c| !c.is_empty()) {
        Some(dir) if dir.starts_with('/') => dir.to_string(),
        Some(dir) => format!("{WORKSPACE_MOUNT}/{}", dir.trim_start_matches('/')),
        None => WORKSPACE_MOUNT.to_string(),
    }
}

/// POSIX single-quote escaping, equivalent to `shlex.quote`.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
