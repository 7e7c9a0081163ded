// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::AgentRole;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Roles the planner is not allowed to dispatch.  The planner itself
    /// cannot be disabled.
    #[serde(default)]
    pub disabled_roles: Vec<AgentRole>,
}

/// Runtime configuration for per-session sandbox containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container image used for every session sandbox.
    pub image: String,
    /// Host directory that holds one workspace directory per session plus
    /// the sandbox metadata registry.
    pub base_path: PathBuf,
    pub cpu_limit: String,
    pub memory_limit: String,
    /// When set, containers run with networking disabled; wins over
    /// `custom_network`.
    pub disable_network: bool,
    /// Command that keeps the container alive.
    pub start_command: String,
    /// Container ports published for HTTP previews.
    pub exposed_ports: Vec<u16>,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Named docker network to attach the container to (created on demand).
    pub custom_network: Option<String>,
    /// Extra environment variables injected into every sandbox.
    pub extra_env: HashMap<String, String>,
    /// Sandboxes idle for at least this long are reaped; 0 disables reaping.
    pub idle_timeout_secs: u64,
    pub gc_interval_secs: u64,
    /// Host prefix used when rendering preview URLs.
    pub preview_host: String,
    /// Bounds applied to workspace tree listings.
    pub max_tree_depth: usize,
    pub max_tree_entries: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "troupe-sandbox:latest".into(),
            base_path: PathBuf::from("/tmp/troupe/sandboxes"),
            cpu_limit: "1".into(),
            memory_limit: "1g".into(),
            disable_network: false,
            start_command: "tail -f /dev/null".into(),
            exposed_ports: vec![3000, 4173, 5173],
            port_range_start: 41000,
            port_range_end: 42000,
            custom_network: None,
            extra_env: HashMap::new(),
            idle_timeout_secs: 1200,
            gc_interval_secs: 300,
            preview_host: "http://127.0.0.1".into(),
            max_tree_depth: 4,
            max_tree_entries: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StorageBackend,
    /// Base directory for session JSON files, context state, step details
    /// and the LLM interaction log.
    pub data_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_path: PathBuf::from("./data/sessions"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider used when a role has no explicit mapping.
    pub default_provider: String,
    /// Per-role provider overrides, e.g. `engineer: anthropic`.
    #[serde(default)]
    pub role_providers: HashMap<AgentRole, String>,
    /// Model name per provider, forwarded verbatim to the provider client.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

impl LlmConfig {
    pub fn provider_for(&self, role: AgentRole) -> &str {
        self.role_providers
            .get(&role)
            .map(String::as_str)
            .unwrap_or(&self.default_provider)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".into(),
            role_providers: HashMap::new(),
            models: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub bind_addr: String,
    /// Permissive CORS for local front-end development.
    #[serde(default = "default_true")]
    pub cors: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            cors: true,
        }
    }
}

/// Polling file watcher that feeds `file_change` events to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub interval_secs: u64,
    pub max_files: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            max_files: 4000,
        }
    }
}
