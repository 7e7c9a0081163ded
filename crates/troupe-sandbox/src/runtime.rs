// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::SandboxError;

/// Everything needed to start one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host directory mounted at /workspace inside the container.
    pub workspace: PathBuf,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub network: NetworkMode,
    /// container port → host port bindings.
    pub port_map: BTreeMap<u16, u16>,
    pub env: Vec<(String, String)>,
    /// Keep-alive command run under `bash -lc`.
    pub start_command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    Disabled,
    Default,
    Named(String),
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The container runtime seam.
///
/// The manager and command service program against this trait so tests can
/// run without Docker.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a fresh container from `spec`, returning its id.
    async fn start_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    /// Find a container by name, starting it if it exists but is stopped.
    /// Returns the container id, or `None` when no such container exists.
    async fn find_container(&self, name: &str) -> Result<Option<String>, SandboxError>;

    /// Stop a container gracefully.  Succeeds when it is already gone.
    async fn stop_container(&self, name: &str) -> Result<(), SandboxError>;

    /// Read the published port bindings (container port → host port).
    async fn inspect_port_bindings(
        &self,
        name: &str,
    ) -> Result<BTreeMap<u16, u16>, SandboxError>;

    /// Create the named network when it does not exist yet.
    async fn ensure_network(&self, name: &str) -> Result<(), SandboxError>;

    /// Execute a shell command inside the container.  Exceeding the timeout
    /// kills the process and surfaces [`SandboxError::Timeout`].
    async fn exec(
        &self,
        name: &str,
        command: &str,
        env: &[(String, String)],
        timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError>;
}

/// Production runtime: shells out to the `docker` CLI.
pub struct DockerCli {
    shell: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".into(),
        }
    }
}

impl DockerCli {
    async fn run_docker(&self, args: &[String]) -> Result<std::process::Output, SandboxError> {
        debug!(args = ?args, "docker invocation");
        let mut cmd = Command::new("docker");
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        Ok(cmd.output().await?)
    }

    fn failure_text(output: &std::process::Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            return stderr;
        }
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn start_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--rm".into(),
            "--cpus".into(),
            spec.cpu_limit.clone(),
            "--memory".into(),
            spec.memory_limit.clone(),
            "-v".into(),
            format!("{}:/workspace", spec.workspace.display()),
            "--workdir".into(),
            "/workspace".into(),
            "--name".into(),
            spec.name.clone(),
        ];
        match &spec.network {
            NetworkMode::Disabled => {
                args.push("--network".into());
                args.push("none".into());
            }
            NetworkMode::Named(network) => {
                self.ensure_network(network).await?;
                args.push("--network".into());
                args.push(network.clone());
            }
            NetworkMode::Default => {}
        }
        for (container_port, host_port) in &spec.port_map {
            args.push("-p".into());
            args.push(format!("{host_port}:{container_port}"));
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args.push("bash".into());
        args.push("-lc".into());
        args.push(spec.start_command.clone());

        let output = self.run_docker(&args).await?;
        if !output.status.success() {
            return Err(SandboxError::container(format!(
                "failed to start sandbox: {}",
                Self::failure_text(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn find_container(&self, name: &str) -> Result<Option<String>, SandboxError> {
        let output = self
            .run_docker(&[
                "ps".into(),
                "-a".into(),
                "--filter".into(),
                format!("name={name}"),
                "--format".into(),
                "{{.ID}} {{.Status}}".into(),
            ])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(None);
        };
        let mut parts = line.split_whitespace();
        let id = parts.next().unwrap_or_default().to_string();
        let status: Vec<&str> = parts.collect();
        if status.first().is_some_and(|s| s.starts_with("Up")) {
            return Ok(Some(id));
        }
        // Stopped container with the canonical name: restart it.
        let _ = self
            .run_docker(&["start".into(), name.to_string()])
            .await?;
        let inspect = self
            .run_docker(&[
                "ps".into(),
                "-q".into(),
                "--filter".into(),
                format!("name={name}"),
            ])
            .await?;
        let restarted = String::from_utf8_lossy(&inspect.stdout).trim().to_string();
        Ok(Some(if restarted.is_empty() { id } else { restarted }))
    }

    async fn stop_container(&self, name: &str) -> Result<(), SandboxError> {
        let output = self
            .run_docker(&["stop".into(), name.to_string()])
            .await?;
        if !output.status.success() {
            let text = Self::failure_text(&output);
            if !text.contains("No such container") {
                return Err(SandboxError::container(if text.is_empty() {
                    "failed to stop container".to_string()
                } else {
                    text
                }));
            }
        }
        Ok(())
    }

    async fn inspect_port_bindings(
        &self,
        name: &str,
    ) -> Result<BTreeMap<u16, u16>, SandboxError> {
        let output = self
            .run_docker(&[
                "inspect".into(),
                name.to_string(),
                "--format".into(),
                "{{json .NetworkSettings.Ports}}".into(),
            ])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || stdout.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(parse_port_bindings(&stdout))
    }

    async fn ensure_network(&self, name: &str) -> Result<(), SandboxError> {
        if name.is_empty() {
            return Ok(());
        }
        let output = self
            .run_docker(&[
                "network".into(),
                "ls".into(),
                "--filter".into(),
                format!("name={name}"),
                "--format".into(),
                "{{.Name}}".into(),
            ])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.lines().any(|line| line.trim() == name) {
            return Ok(());
        }
        let create = self
            .run_docker(&["network".into(), "create".into(), name.to_string()])
            .await?;
        if !create.status.success() {
            let text = Self::failure_text(&create);
            return Err(SandboxError::container(if text.is_empty() {
                format!("failed to create network {name}")
            } else {
                text
            }));
        }
        Ok(())
    }

    async fn exec(
        &self,
        name: &str,
        command: &str,
        env: &[(String, String)],
        timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError> {
        let mut args: Vec<String> = vec!["exec".into(), "-i".into()];
        for (key, value) in env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(name.to_string());
        args.push(self.shell.clone());
        args.push("-lc".into());
        args.push(command.to_string());

        let mut cmd = Command::new("docker");
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        // When the timeout fires the future is dropped and tokio kills the
        // docker client before releasing the handle.
        cmd.kill_on_drop(true);
        let result = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
        match result {
            Ok(Ok(output)) => Ok(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(SandboxError::Timeout(timeout_secs)),
        }
    }
}

/// Parse docker's `NetworkSettings.Ports` JSON
/// (`{"3000/tcp": [{"HostIp": "...", "HostPort": "41000"}], ...}`).
fn parse_port_bindings(raw: &str) -> BTreeMap<u16, u16> {
    let mut port_map = BTreeMap::new();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return port_map;
    };
    let Some(entries) = value.as_object() else {
        return port_map;
    };
    for (key, bindings) in entries {
        let Some(container_port) = key
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let Some(host_port) = bindings
            .as_array()
            .and_then(|list| list.first())
            .and_then(|first| first.get("HostPort"))
            .and_then(|port| port.as_str())
            .and_then(|port| port.parse::<u16>().ok())
        else {
            continue;
        };
        port_map.insert(container_port, host_port);
    }
    port_map
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_port_bindings() {
        let raw = r#"{"3000/tcp":[{"HostIp":"0.0.0.0","HostPort":"41000"}],"4173/tcp":[{"HostIp":"0.0.0.0","HostPort":"41001"}]}"#;
        let ports = parse_port_bindings(raw);
        assert_eq!(ports.get(&3000), Some(&41000));
        assert_eq!(ports.get(&4173), Some(&41001));
    }

    #[test]
    fn unbound_and_malformed_entries_are_skipped() {
        let raw = r#"{"5173/tcp":null,"junk":[{"HostPort":"1"}],"3000/tcp":[{"HostPort":"nope"}]}"#;
        assert!(parse_port_bindings(raw).is_empty());
        assert!(parse_port_bindings("not json").is_empty());
    }
}
