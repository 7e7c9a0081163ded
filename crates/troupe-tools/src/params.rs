// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use crate::ToolError;

/// Fetch a required non-empty string parameter.
pub fn require_str(params: &Value, key: &str) -> Result<String, ToolError> {
    match params.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ToolError::bad_param(key, "expected a non-empty string")),
    }
}

/// Fetch an optional string parameter; empty strings collapse to `None`.
pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalise a workspace-relative path: strip leading slashes, forbid `..`
/// components, and optionally coerce the path under a docs root for roles
/// that may only write documentation.
pub fn normalize_rel_path(raw: &str, docs_root: Option<&str>) -> Result<String, ToolError> {
    let clean = raw.trim().trim_start_matches('/');
    if clean.is_empty() {
        return Err(ToolError::bad_param("path", "expected a non-empty path"));
    }
    let parts: Vec<&str> = clean.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if parts.iter().any(|p| *p == "..") {
        return Err(ToolError::bad_param("path", "path must not contain .."));
    }
    let mut normalized = parts.join("/");
    if let Some(root) = docs_root {
        if parts.first() != Some(&root) {
            normalized = format!("{root}/{normalized}");
        }
    }
    Ok(normalized)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
