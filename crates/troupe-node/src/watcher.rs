// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use troupe_config::WatcherConfig;
use troupe_stream::{SessionStreamManager, StreamEvent};

/// Polling file watcher: snapshots each session workspace on an interval
/// and broadcasts a `file_change` event with the paths that changed.
/// `file_change` events are transport-only and never persisted.
pub struct FileWatcherManager {
    streams: Arc<SessionStreamManager>,
    interval: Duration,
    max_files: usize,
    tasks: Mutex<HashMap<String, (CancellationToken, JoinHandle<()>)>>,
}

impl FileWatcherManager {
    pub fn new(streams: Arc<SessionStreamManager>, config: WatcherConfig) -> Self {
        Self {
            streams,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            max_files: config.max_files,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start watching a session workspace; a second call for the same
    /// session is a no-op.
    pub fn ensure_watch(&self, session_id: &str, root: PathBuf) {
        let mut tasks = self.tasks.lock().expect("watcher table poisoned");
        if tasks.contains_key(session_id) {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(
            self.streams.clone(),
            session_id.to_string(),
            root,
            self.interval,
            self.max_files,
            cancel.clone(),
        ));
        tasks.insert(session_id.to_string(), (cancel, task));
        debug!(session = %session_id, "file watcher started");
    }

    pub fn stop_watch(&self, session_id: &str) {
        let mut tasks = self.tasks.lock().expect("watcher table poisoned");
        if let Some((cancel, task)) = tasks.remove(session_id) {
            cancel.cancel();
            task.abort();
            debug!(session = %session_id, "file watcher stopped");
        }
    }

    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock().expect("watcher table poisoned");
        for (_, (cancel, task)) in tasks.drain() {
            cancel.cancel();
            task.abort();
        }
    }
}

async fn watch_loop(
    streams: Arc<SessionStreamManager>,
    session_id: String,
    root: PathBuf,
    interval: Duration,
    max_files: usize,
    cancel: CancellationToken,
) {
    let mut previous = snapshot(&root, max_files);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let current = snapshot(&root, max_files);
                let changed = diff(&previous, &current);
                if !changed.is_empty() {
                    streams.broadcast(&session_id, StreamEvent::file_change(changed));
                }
                previous = current;
            }
        }
    }
}

/// Relative path → mtime seconds for every file under `root`, bounded by
/// `max_files`.
fn snapshot(root: &Path, max_files: usize) -> HashMap<String, i64> {
    let mut files = HashMap::new();
    if root.exists() {
        collect(root, root, max_files, &mut files);
    }
    files
}

fn collect(root: &Path, dir: &Path, max_files: usize, out: &mut HashMap<String, i64>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.filter_map(Result::ok) {
        if out.len() >= max_files {
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            collect(root, &path, max_files, out);
        } else {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let rel = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| path.to_string_lossy().into_owned());
            out.insert(rel, mtime);
        }
    }
}

/// Paths added, modified or removed between two snapshots.
fn diff(previous: &HashMap<String, i64>, current: &HashMap<String, i64>) -> Vec<String> {
    let mut changed = Vec::new();
    for (path, mtime) in current {
        if previous.get(path) != Some(mtime) {
            changed.push(path.clone());
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            changed.push(path.clone());
        }
    }
    changed.sort();
    changed
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_adds_changes_and_removals() {
        let mut before = HashMap::new();
        before.insert("kept.txt".to_string(), 1);
        before.insert("gone.txt".to_string(), 1);
        before.insert("touched.txt".to_string(), 1);
        let mut after = HashMap::new();
        after.insert("kept.txt".to_string(), 1);
        after.insert("touched.txt".to_string(), 2);
        after.insert("new.txt".to_string(), 5);
        assert_eq!(
            diff(&before, &after),
            vec!["gone.txt", "new.txt", "touched.txt"]
        );
    }

    #[test]
    fn snapshot_skips_hidden_and_bounds_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "x").unwrap();
        let snap = snapshot(dir.path(), 10);
        assert_eq!(snap.len(), 2);
        assert!(snap.contains_key("a.txt"));
        assert!(snap.contains_key("sub/b.txt"));
        assert!(snapshot(dir.path(), 1).len() <= 1);
    }

    #[tokio::test]
    async fn watcher_broadcasts_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let streams = Arc::new(SessionStreamManager::new());
        let manager = FileWatcherManager::new(
            streams.clone(),
            WatcherConfig {
                interval_secs: 1,
                max_files: 100,
            },
        );
        let (_replay, mut rx) = streams.subscribe("s1");
        manager.ensure_watch("s1", dir.path().to_path_buf());
        // Give the loop its initial snapshot before mutating.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("fresh.txt"), "hello").unwrap();
        let envelope = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change event")
            .expect("channel open");
        match envelope.event {
            StreamEvent::FileChange { paths } => assert_eq!(paths, vec!["fresh.txt"]),
            other => panic!("unexpected event {other:?}"),
        }
        manager.stop_watch("s1");
    }
}
