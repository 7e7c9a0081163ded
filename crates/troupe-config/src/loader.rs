// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::{Config, StorageBackend};

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones; environment variables
/// override everything.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/troupe/config.yaml"));
    paths.push(PathBuf::from("/etc/troupe/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/troupe/config.yaml"));
        paths.push(home.join(".config/troupe/config.yml"));
    }

    paths.push(PathBuf::from(".troupe.yaml"));
    paths.push(PathBuf::from(".troupe.yml"));
    paths.push(PathBuf::from("troupe.yaml"));
    paths.push(PathBuf::from("troupe.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then applying
/// environment-variable overrides.  `extra` may name an explicit file
/// (e.g. a `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Apply the documented environment variables on top of `config`.
///
/// Takes the variable lookup as a closure so tests can drive it without
/// touching the process environment.
pub fn apply_env<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = var("SANDBOX_IMAGE") {
        config.sandbox.image = v;
    }
    if let Some(v) = var("SANDBOX_BASE_PATH") {
        config.sandbox.base_path = PathBuf::from(v);
    }
    if let Some(v) = var("SANDBOX_CPU") {
        config.sandbox.cpu_limit = v;
    }
    if let Some(v) = var("SANDBOX_MEMORY") {
        config.sandbox.memory_limit = v;
    }
    if let Some(v) = var("SANDBOX_DISABLE_NETWORK") {
        config.sandbox.disable_network = v == "1";
    }
    if let Some(v) = var("SANDBOX_COMMAND") {
        config.sandbox.start_command = v;
    }
    if let Some(v) = var("SANDBOX_EXPOSED_PORTS") {
        let fallback = std::mem::take(&mut config.sandbox.exposed_ports);
        config.sandbox.exposed_ports = parse_port_list(&v, &fallback);
    }
    if let Some(v) = var("SANDBOX_PORT_START") {
        if let Ok(port) = v.trim().parse() {
            config.sandbox.port_range_start = port;
        }
    }
    if let Some(v) = var("SANDBOX_PORT_END") {
        if let Ok(port) = v.trim().parse() {
            config.sandbox.port_range_end = port;
        }
    }
    if let Some(v) = var("SANDBOX_NETWORK") {
        let trimmed = v.trim().to_string();
        config.sandbox.custom_network = (!trimmed.is_empty()).then_some(trimmed);
    }
    if let Some(v) = var("SANDBOX_EXTRA_ENV") {
        config.sandbox.extra_env = parse_extra_env(&v);
    }
    if let Some(v) = var("SANDBOX_IDLE_TIMEOUT") {
        if let Ok(secs) = v.trim().parse() {
            config.sandbox.idle_timeout_secs = secs;
        }
    }
    if let Some(v) = var("SANDBOX_GC_INTERVAL") {
        if let Ok(secs) = v.trim().parse() {
            config.sandbox.gc_interval_secs = secs;
        }
    }
    if let Some(v) = var("SANDBOX_PREVIEW_HOST") {
        config.sandbox.preview_host = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = var("SESSION_DATA_PATH") {
        config.store.data_path = PathBuf::from(v);
    }
    if let Some(v) = var("SESSION_STORAGE_BACKEND") {
        config.store.backend = match v.trim().to_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::File,
        };
    }
    if let Some(v) = var("TROUPE_LLM_PROVIDER") {
        config.llm.default_provider = v;
    }
    if let Some(v) = var("TROUPE_BIND_ADDR") {
        config.node.bind_addr = v;
    }
}

/// Parse a comma-separated port list; falls back when nothing parses.
fn parse_port_list(raw: &str, fallback: &[u16]) -> Vec<u16> {
    let ports: Vec<u16> = raw
        .split(',')
        .filter_map(|chunk| chunk.trim().parse().ok())
        .collect();
    if ports.is_empty() {
        fallback.to_vec()
    } else {
        ports
    }
}

/// Parse `KEY=VAL,KEY2=VAL2` into a map; malformed pairs are skipped.
fn parse_extra_env(raw: &str) -> HashMap<String, String> {
    let mut envs = HashMap::new();
    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if !key.is_empty() {
            envs.insert(key.to_string(), value.trim().to_string());
        }
    }
    envs
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
