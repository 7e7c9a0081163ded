// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::manager::ContainerManager;
use crate::FileAccessError;

/// Post-write content check.  A failing validator rolls the write back.
pub trait FileValidator: Send + Sync {
    fn validate(&self, path: &Path, content: &str) -> Result<(), String>;
}

/// Default validation: JSON files must parse.
pub struct DefaultFileValidator;

impl FileValidator for DefaultFileValidator {
    fn validate(&self, path: &Path, content: &str) -> Result<(), String> {
        let suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        if matches!(suffix.as_deref(), Some("json") | Some("jsonc")) {
            serde_json::from_str::<serde_json::Value>(content)
                .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_at: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_at: String,
    pub created: bool,
}

/// Scoped file access to a session's workspace directory.
///
/// Every operation goes through `ensure_session_container` first, so a
/// container exists and the instance is marked active before any disk I/O.
pub struct FileService {
    manager: Arc<ContainerManager>,
    validator: Arc<dyn FileValidator>,
}

impl FileService {
    pub fn new(manager: Arc<ContainerManager>) -> Self {
        Self {
            manager,
            validator: Arc::new(DefaultFileValidator),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn FileValidator>) -> Self {
        self.validator = validator;
        self
    }

    async fn resolve_base(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<PathBuf, FileAccessError> {
        let instance = self
            .manager
            .ensure_session_container(session_id, owner_id)
            .await?;
        if !instance.workspace_path.exists() {
            std::fs::create_dir_all(&instance.workspace_path)?;
        }
        Ok(instance.workspace_path)
    }

    /// List the workspace tree, bounded by depth and total entry count.
    pub async fn list_tree(
        &self,
        session_id: &str,
        owner_id: &str,
        root: &str,
        depth: usize,
        include_hidden: bool,
    ) -> Result<Vec<TreeNode>, FileAccessError> {
        if depth == 0 {
            return Err(FileAccessError::InvalidDepth);
        }
        let depth = depth.min(self.manager.config().max_tree_depth);
        let max_entries = self.manager.config().max_tree_entries;
        let base = self.resolve_base(session_id, owner_id).await?;
        let target = resolve_within(&base, root)?;

        let walk_base = base.clone();
        tokio::task::spawn_blocking(move || {
            if target.is_file() {
                let meta = target.metadata()?;
                return Ok(vec![TreeNode {
                    name: file_name(&target),
                    path: relative_to(&walk_base, &target),
                    kind: "file",
                    size: meta.len(),
                    children: None,
                }]);
            }
            let mut counted = 0usize;
            walk(&walk_base, &target, 1, depth, include_hidden, max_entries, &mut counted)
        })
        .await
        .map_err(|e| FileAccessError::Io(std::io::Error::other(e)))?
    }

    /// Read a UTF-8 (lossy-decoded) file from the workspace.
    pub async fn read_file(
        &self,
        session_id: &str,
        owner_id: &str,
        path: &str,
    ) -> Result<FileContent, FileAccessError> {
        let base = self.resolve_base(session_id, owner_id).await?;
        let target = resolve_within(&base, path)?;
        if !target.is_file() {
            return Err(FileAccessError::NotFound);
        }
        let bytes = tokio::fs::read(&target).await?;
        let meta = tokio::fs::metadata(&target).await?;
        Ok(FileContent {
            name: file_name(&target),
            path: path.to_string(),
            size: meta.len(),
            modified_at: modified_rfc3339(&meta),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Write or append a file, then run the content validator; a validation
    /// failure restores the previous content (or removes a new file).
    pub async fn write_file(
        &self,
        session_id: &str,
        owner_id: &str,
        path: &str,
        content: &str,
        overwrite: bool,
        append: bool,
    ) -> Result<WriteOutcome, FileAccessError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed.ends_with('/') {
            return Err(FileAccessError::InvalidPath(
                "path must name a file".into(),
            ));
        }
        let base = self.resolve_base(session_id, owner_id).await?;
        let target = resolve_within(&base, trimmed)?;
        let existed = target.exists();
        if existed && target.is_dir() {
            return Err(FileAccessError::IsDirectory);
        }
        if existed && !overwrite && !append {
            return Err(FileAccessError::AlreadyExists);
        }
        // Capture the pre-write bytes so a failed validation can roll back
        // to exactly what was on disk.
        let previous = if existed {
            Some(tokio::fs::read(&target).await?)
        } else {
            None
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if append {
            let mut merged = previous.clone().unwrap_or_default();
            merged.extend_from_slice(content.as_bytes());
            tokio::fs::write(&target, merged).await?;
        } else {
            tokio::fs::write(&target, content.as_bytes()).await?;
        }

        let written = tokio::fs::read(&target).await?;
        let written_text = String::from_utf8_lossy(&written).into_owned();
        if let Err(reason) = self.validator.validate(&target, &written_text) {
            debug!(path = %target.display(), "write validation failed, rolling back");
            match previous {
                Some(bytes) => tokio::fs::write(&target, bytes).await?,
                None => {
                    let _ = tokio::fs::remove_file(&target).await;
                }
            }
            return Err(FileAccessError::Validation(reason));
        }

        let meta = tokio::fs::metadata(&target).await?;
        Ok(WriteOutcome {
            name: file_name(&target),
            path: relative_to(&base, &target),
            size: meta.len(),
            modified_at: modified_rfc3339(&meta),
            created: !existed,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn relative_to(base: &Path, target: &Path) -> String {
    target
        .strip_prefix(base)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| target.to_string_lossy().into_owned())
}

fn modified_rfc3339(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default()
}

/// Join `rel` under `base`, normalising components without touching the
/// filesystem.  Any traversal that would leave the base fails.
fn resolve_within(base: &Path, rel: &str) -> Result<PathBuf, FileAccessError> {
    let trimmed = rel.trim().trim_start_matches('/');
    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(FileAccessError::PathEscape);
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(FileAccessError::PathEscape);
            }
        }
    }
    Ok(resolved)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    base: &Path,
    dir: &Path,
    current_depth: usize,
    max_depth: usize,
    include_hidden: bool,
    max_entries: usize,
    counted: &mut usize,
) -> Result<Vec<TreeNode>, FileAccessError> {
    if current_depth > max_depth {
        return Ok(Vec::new());
    }
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Ok(Vec::new());
    };
    let mut entries: Vec<std::fs::DirEntry> = read_dir.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());

    let mut children = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        *counted += 1;
        if *counted > max_entries {
            return Err(FileAccessError::TooManyEntries);
        }
        let entry_path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            children.push(TreeNode {
                name,
                path: relative_to(base, &entry_path),
                kind: "directory",
                size: meta.len(),
                children: Some(walk(
                    base,
                    &entry_path,
                    current_depth + 1,
                    max_depth,
                    include_hidden,
                    max_entries,
                    counted,
                )?),
            });
        } else {
            children.push(TreeNode {
                name,
                path: relative_to(base, &entry_path),
                kind: "file",
                size: meta.len(),
                children: None,
            });
        }
    }
    Ok(children)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use troupe_config::SandboxConfig;

    use super::*;
    use crate::testing::StubRuntime;

    async fn service(dir: &Path) -> FileService {
        let mut config = SandboxConfig::default();
        config.base_path = dir.to_path_buf();
        config.exposed_ports = vec![3000];
        let manager = Arc::new(
            ContainerManager::new(config, Arc::new(StubRuntime::new()))
                .await
                .unwrap(),
        );
        FileService::new(manager)
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        let outcome = files
            .write_file("s1", "o1", "src/main.go", "package main", true, false)
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.path, "src/main.go");
        let content = files.read_file("s1", "o1", "src/main.go").await.unwrap();
        assert_eq!(content.content, "package main");
        assert_eq!(content.size, 12);
    }

    #[tokio::test]
    async fn append_mode_extends_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        files
            .write_file("s1", "o1", "notes.txt", "one\n", true, false)
            .await
            .unwrap();
        files
            .write_file("s1", "o1", "notes.txt", "two\n", false, true)
            .await
            .unwrap();
        let content = files.read_file("s1", "o1", "notes.txt").await.unwrap();
        assert_eq!(content.content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn existing_file_requires_overwrite_or_append() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        files
            .write_file("s1", "o1", "a.txt", "x", true, false)
            .await
            .unwrap();
        let err = files
            .write_file("s1", "o1", "a.txt", "y", false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FileAccessError::AlreadyExists));
    }

    #[tokio::test]
    async fn traversal_outside_workspace_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        let err = files
            .read_file("s1", "o1", "../other/secrets")
            .await
            .unwrap_err();
        assert!(matches!(err, FileAccessError::PathEscape));
        // `..` inside the workspace is allowed as long as it stays inside.
        files
            .write_file("s1", "o1", "a/../b.txt", "ok", true, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_validation_rolls_back_to_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        files
            .write_file("s1", "o1", "config.json", "{\"ok\": true}", true, false)
            .await
            .unwrap();
        let err = files
            .write_file("s1", "o1", "config.json", "{broken", true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FileAccessError::Validation(_)));
        let content = files.read_file("s1", "o1", "config.json").await.unwrap();
        assert_eq!(content.content, "{\"ok\": true}");
    }

    #[tokio::test]
    async fn failed_validation_removes_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        let err = files
            .write_file("s1", "o1", "fresh.json", "nope", true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FileAccessError::Validation(_)));
        let err = files.read_file("s1", "o1", "fresh.json").await.unwrap_err();
        assert!(matches!(err, FileAccessError::NotFound));
    }

    #[tokio::test]
    async fn list_tree_respects_depth_and_hidden_filter() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        files
            .write_file("s1", "o1", "top.txt", "t", true, false)
            .await
            .unwrap();
        files
            .write_file("s1", "o1", ".hidden", "h", true, false)
            .await
            .unwrap();
        files
            .write_file("s1", "o1", "a/b/deep.txt", "d", true, false)
            .await
            .unwrap();

        let shallow = files.list_tree("s1", "o1", "", 1, false).await.unwrap();
        let names: Vec<&str> = shallow.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "top.txt"]);
        assert!(shallow[0].children.as_ref().unwrap().is_empty());

        let with_hidden = files.list_tree("s1", "o1", "", 1, true).await.unwrap();
        assert!(with_hidden.iter().any(|n| n.name == ".hidden"));

        let deep = files.list_tree("s1", "o1", "", 3, false).await.unwrap();
        let a = deep.iter().find(|n| n.name == "a").unwrap();
        let b = &a.children.as_ref().unwrap()[0];
        assert_eq!(b.children.as_ref().unwrap()[0].name, "deep.txt");
    }

    #[tokio::test]
    async fn zero_depth_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        let err = files.list_tree("s1", "o1", "", 0, false).await.unwrap_err();
        assert!(matches!(err, FileAccessError::InvalidDepth));
    }

    #[tokio::test]
    async fn oversized_tree_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SandboxConfig::default();
        config.base_path = dir.path().to_path_buf();
        config.exposed_ports = vec![3000];
        config.max_tree_entries = 3;
        let manager = Arc::new(
            ContainerManager::new(config, Arc::new(StubRuntime::new()))
                .await
                .unwrap(),
        );
        let files = FileService::new(manager);
        for n in 0..5 {
            files
                .write_file("s1", "o1", &format!("f{n}.txt"), "x", true, false)
                .await
                .unwrap();
        }
        let err = files.list_tree("s1", "o1", "", 2, false).await.unwrap_err();
        assert!(matches!(err, FileAccessError::TooManyEntries));
    }

    #[tokio::test]
    async fn listing_a_file_root_returns_single_node() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(dir.path()).await;
        files
            .write_file("s1", "o1", "only.txt", "x", true, false)
            .await
            .unwrap();
        let nodes = files
            .list_tree("s1", "o1", "only.txt", 2, false)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, "file");
    }
}
