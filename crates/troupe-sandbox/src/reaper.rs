// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::ContainerManager;

/// Background task that periodically reaps idle sandboxes.
///
/// `stop` cancels the token and awaits the task; a cancellation that arrives
/// mid-sleep exits the wait immediately.
pub struct IdleReaper {
    manager: Arc<ContainerManager>,
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl IdleReaper {
    pub fn new(manager: Arc<ContainerManager>, interval_secs: u64) -> Self {
        Self {
            manager,
            interval: Duration::from_secs(interval_secs.max(5)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let manager = self.manager.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "sandbox idle reaper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let reaped = manager.cleanup_idle(None).await;
                        if !reaped.is_empty() {
                            info!(count = reaped.len(), sessions = ?reaped, "reaped idle sandboxes");
                        }
                    }
                }
            }
        }));
    }

    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        if let Err(err) = task.await {
            warn!("idle reaper task ended abnormally: {err}");
        }
        info!("sandbox idle reaper stopped");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use troupe_config::SandboxConfig;

    use super::*;
    use crate::testing::StubRuntime;

    #[tokio::test]
    async fn stop_interrupts_the_wait_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SandboxConfig::default();
        config.base_path = dir.path().to_path_buf();
        let manager = Arc::new(
            ContainerManager::new(config, Arc::new(StubRuntime::new()))
                .await
                .unwrap(),
        );
        // Long interval: without cancellation this would block for minutes.
        let mut reaper = IdleReaper::new(manager, 3600);
        reaper.start();
        tokio::time::timeout(Duration::from_secs(1), reaper.stop())
            .await
            .expect("stop should return promptly");
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SandboxConfig::default();
        config.base_path = dir.path().to_path_buf();
        let manager = Arc::new(
            ContainerManager::new(config, Arc::new(StubRuntime::new()))
                .await
                .unwrap(),
        );
        let mut reaper = IdleReaper::new(manager, 3600);
        reaper.start();
        reaper.start();
        reaper.stop().await;
    }
}
