// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use troupe_config::SandboxConfig;

use crate::ports::PortAllocator;
use crate::runtime::{ContainerRuntime, ContainerSpec, NetworkMode};
use crate::SandboxError;

/// One live sandbox.  Exactly one instance exists per session id while the
/// container is alive; the manager is the single mutator of the port map and
/// the last-used stamp.
#[derive(Debug, Clone)]
pub struct SandboxInstance {
    pub session_id: String,
    pub owner_id: String,
    pub container_name: String,
    pub container_id: String,
    pub workspace_path: PathBuf,
    /// container port → host port.
    pub port_map: BTreeMap<u16, u16>,
    /// Unix seconds of the last activity.
    pub last_used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaEntry {
    owner_id: String,
    last_used: i64,
    port_map: BTreeMap<u16, u16>,
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn write_meta_atomic(
    path: &Path,
    entries: &BTreeMap<String, MetaEntry>,
) -> Result<(), SandboxError> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(entries)
        .map_err(|e| SandboxError::container(e.to_string()))?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Container lifecycle manager for per-session sandboxes.
///
/// The instance map is an async mutex held across runtime calls so that the
/// create/restore path runs exactly once per session; the metadata registry
/// and port set use short synchronous critical sections of their own and are
/// never held together with anything else.
pub struct ContainerManager {
    config: SandboxConfig,
    runtime: Arc<dyn ContainerRuntime>,
    instances: Mutex<HashMap<String, SandboxInstance>>,
    ports: PortAllocator,
    metadata: std::sync::Mutex<BTreeMap<String, MetaEntry>>,
    metadata_path: PathBuf,
}

impl ContainerManager {
    /// Build the manager and replay persisted metadata: entries whose
    /// container still exists are restored (ports re-reserved), the rest are
    /// discarded.
    pub async fn new(
        config: SandboxConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&config.base_path)?;
        let metadata_path = config.base_path.join("sandboxes_meta.json");
        let entries: BTreeMap<String, MetaEntry> = match std::fs::read_to_string(&metadata_path)
        {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        let manager = Self {
            ports: PortAllocator::new(config.port_range_start, config.port_range_end)?,
            metadata: std::sync::Mutex::new(entries),
            metadata_path,
            runtime,
            instances: Mutex::new(HashMap::new()),
            config,
        };
        manager.restore_instances().await?;
        Ok(manager)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn container_name(session_id: &str) -> String {
        format!("troupe-session-{session_id}")
    }

    pub fn workspace_path(&self, session_id: &str) -> PathBuf {
        self.config.base_path.join(session_id)
    }

    fn network_mode(&self) -> NetworkMode {
        if self.config.disable_network {
            NetworkMode::Disabled
        } else if let Some(network) = &self.config.custom_network {
            NetworkMode::Named(network.clone())
        } else {
            NetworkMode::Default
        }
    }

    /// Return the existing sandbox for the session or create a new one,
    /// recovering a surviving container after a backend restart when
    /// possible.
    pub async fn ensure_session_container(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<SandboxInstance, SandboxError> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(session_id) {
            instance.last_used = now_ts();
            let snapshot = instance.clone();
            self.persist_instance(&snapshot)?;
            return Ok(snapshot);
        }

        let workspace_path = self.workspace_path(session_id);
        std::fs::create_dir_all(&workspace_path)?;
        let container_name = Self::container_name(session_id);

        if let Some(container_id) = self.runtime.find_container(&container_name).await? {
            let port_map = self
                .runtime
                .inspect_port_bindings(&container_name)
                .await?;
            for host_port in port_map.values() {
                self.ports.reserve(*host_port);
            }
            let instance = SandboxInstance {
                session_id: session_id.to_string(),
                owner_id: owner_id.to_string(),
                container_name,
                container_id,
                workspace_path,
                port_map,
                last_used: now_ts(),
            };
            info!(session = %session_id, "recovered existing sandbox container");
            self.persist_instance(&instance)?;
            instances.insert(session_id.to_string(), instance.clone());
            return Ok(instance);
        }

        let mut last_error: Option<SandboxError> = None;
        for attempt in 1..=3 {
            let port_map = self.allocate_ports()?;
            let spec = ContainerSpec {
                name: container_name.clone(),
                image: self.config.image.clone(),
                workspace: workspace_path.clone(),
                cpu_limit: self.config.cpu_limit.clone(),
                memory_limit: self.config.memory_limit.clone(),
                network: self.network_mode(),
                port_map: port_map.clone(),
                env: self
                    .config
                    .extra_env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                start_command: self.config.start_command.clone(),
            };
            match self.runtime.start_container(&spec).await {
                Ok(container_id) => {
                    let instance = SandboxInstance {
                        session_id: session_id.to_string(),
                        owner_id: owner_id.to_string(),
                        container_name,
                        container_id,
                        workspace_path,
                        port_map,
                        last_used: now_ts(),
                    };
                    info!(session = %session_id, ports = ?instance.port_map, "started sandbox container");
                    self.persist_instance(&instance)?;
                    instances.insert(session_id.to_string(), instance.clone());
                    return Ok(instance);
                }
                Err(err) => {
                    self.release_ports(&port_map);
                    let retryable = matches!(&err, SandboxError::Container(msg)
                        if msg.to_lowercase().contains("port is already allocated"));
                    if !retryable {
                        return Err(err);
                    }
                    warn!(session = %session_id, attempt, "host port collision, retrying");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| SandboxError::container("failed to start sandbox after retries")))
    }

    /// Current instance for the session, with its last-used stamp refreshed.
    pub async fn get_instance(&self, session_id: &str) -> Option<SandboxInstance> {
        let mut instances = self.instances.lock().await;
        let instance = instances.get_mut(session_id)?;
        instance.last_used = now_ts();
        Some(instance.clone())
    }

    /// Stop and forget the session's sandbox.  Ports are released and the
    /// metadata entry removed even when the container stop fails.
    pub async fn destroy_session_container(
        &self,
        session_id: &str,
    ) -> Result<bool, SandboxError> {
        let Some(instance) = self.instances.lock().await.remove(session_id) else {
            return Ok(false);
        };
        let stop_result = self.runtime.stop_container(&instance.container_name).await;
        self.release_ports(&instance.port_map);
        self.remove_metadata(session_id)?;
        stop_result?;
        info!(session = %session_id, "destroyed sandbox container");
        Ok(true)
    }

    /// Destroy every live sandbox, optionally filtered by owner.  Returns
    /// the session ids that were torn down.
    pub async fn destroy_all(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<String>, SandboxError> {
        let targets: Vec<String> = {
            let instances = self.instances.lock().await;
            instances
                .values()
                .filter(|i| owner_id.map_or(true, |o| i.owner_id == o))
                .map(|i| i.session_id.clone())
                .collect()
        };
        let mut stopped = Vec::new();
        for session_id in targets {
            if self.destroy_session_container(&session_id).await? {
                stopped.push(session_id);
            }
        }
        Ok(stopped)
    }

    /// Refresh the session's last-used stamp and persist it.
    pub async fn mark_active(&self, session_id: &str) -> Result<(), SandboxError> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(session_id) {
            instance.last_used = now_ts();
            let snapshot = instance.clone();
            self.persist_instance(&snapshot)?;
        }
        Ok(())
    }

    /// Destroy every sandbox idle for at least the configured timeout.
    /// Returns the reaped session ids.
    pub async fn cleanup_idle(&self, now: Option<i64>) -> Vec<String> {
        let timeout = self.config.idle_timeout_secs as i64;
        if timeout <= 0 {
            return Vec::new();
        }
        let now_ts = now.unwrap_or_else(now_ts);
        let idle: Vec<String> = {
            let instances = self.instances.lock().await;
            instances
                .values()
                .filter(|i| now_ts - i.last_used >= timeout)
                .map(|i| i.session_id.clone())
                .collect()
        };
        let mut reaped = Vec::new();
        for session_id in idle {
            match self.destroy_session_container(&session_id).await {
                Ok(true) => reaped.push(session_id),
                Ok(false) => {}
                Err(err) => {
                    warn!(session = %session_id, "idle cleanup failed: {err}");
                }
            }
        }
        reaped
    }

    /// Preview URLs for the instance's published ports
    /// (container port → `<preview_host>:<host_port>`).
    pub fn preview_urls(&self, instance: &SandboxInstance) -> BTreeMap<u16, String> {
        instance
            .port_map
            .iter()
            .map(|(container_port, host_port)| {
                (
                    *container_port,
                    format!("{}:{host_port}", self.config.preview_host),
                )
            })
            .collect()
    }

    pub async fn live_sessions(&self) -> Vec<String> {
        self.instances.lock().await.keys().cloned().collect()
    }

    fn allocate_ports(&self) -> Result<BTreeMap<u16, u16>, SandboxError> {
        let mut port_map = BTreeMap::new();
        for container_port in &self.config.exposed_ports {
            match self.ports.acquire() {
                Ok(host_port) => {
                    port_map.insert(*container_port, host_port);
                }
                Err(err) => {
                    self.release_ports(&port_map);
                    return Err(err);
                }
            }
        }
        Ok(port_map)
    }

    fn release_ports(&self, port_map: &BTreeMap<u16, u16>) {
        for host_port in port_map.values() {
            self.ports.release(*host_port);
        }
    }

    fn persist_instance(&self, instance: &SandboxInstance) -> Result<(), SandboxError> {
        let mut metadata = self.metadata.lock().expect("metadata poisoned");
        metadata.insert(
            instance.session_id.clone(),
            MetaEntry {
                owner_id: instance.owner_id.clone(),
                last_used: instance.last_used,
                port_map: instance.port_map.clone(),
            },
        );
        write_meta_atomic(&self.metadata_path, &metadata)
    }

    fn remove_metadata(&self, session_id: &str) -> Result<(), SandboxError> {
        let mut metadata = self.metadata.lock().expect("metadata poisoned");
        if metadata.remove(session_id).is_some() {
            write_meta_atomic(&self.metadata_path, &metadata)?;
        }
        Ok(())
    }

    async fn restore_instances(&self) -> Result<(), SandboxError> {
        let entries: Vec<(String, MetaEntry)> = {
            let metadata = self.metadata.lock().expect("metadata poisoned");
            metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        let mut kept: BTreeMap<String, MetaEntry> = BTreeMap::new();
        let mut instances = self.instances.lock().await;
        for (session_id, entry) in entries {
            if entry.owner_id.is_empty() {
                continue;
            }
            let container_name = Self::container_name(&session_id);
            let Some(container_id) = self.runtime.find_container(&container_name).await? else {
                debug!(session = %session_id, "dropping stale sandbox metadata");
                continue;
            };
            let mut port_map = self
                .runtime
                .inspect_port_bindings(&container_name)
                .await?;
            if port_map.is_empty() {
                port_map = entry.port_map.clone();
            }
            for host_port in port_map.values() {
                self.ports.reserve(*host_port);
            }
            let instance = SandboxInstance {
                session_id: session_id.clone(),
                owner_id: entry.owner_id.clone(),
                container_name,
                container_id,
                workspace_path: self.workspace_path(&session_id),
                port_map: port_map.clone(),
                last_used: entry.last_used,
            };
            instances.insert(session_id.clone(), instance);
            kept.insert(
                session_id,
                MetaEntry {
                    port_map,
                    ..entry
                },
            );
        }
        if !instances.is_empty() {
            info!(count = instances.len(), "restored sandbox instances from metadata");
        }
        let mut metadata = self.metadata.lock().expect("metadata poisoned");
        *metadata = kept;
        write_meta_atomic(&self.metadata_path, &metadata)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubRuntime;

    fn test_config(dir: &Path, range: (u16, u16), exposed: Vec<u16>) -> SandboxConfig {
        let mut config = SandboxConfig::default();
        config.base_path = dir.to_path_buf();
        config.port_range_start = range.0;
        config.port_range_end = range.1;
        config.exposed_ports = exposed;
        config.idle_timeout_secs = 60;
        config
    }

    async fn manager_with(
        dir: &Path,
        range: (u16, u16),
        exposed: Vec<u16>,
    ) -> (ContainerManager, Arc<StubRuntime>) {
        let runtime = Arc::new(StubRuntime::new());
        let manager = ContainerManager::new(
            test_config(dir, range, exposed),
            runtime.clone(),
        )
        .await
        .unwrap();
        (manager, runtime)
    }

    #[tokio::test]
    async fn ensure_starts_container_with_unique_ports() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) =
            manager_with(dir.path(), (41000, 41010), vec![3000, 4173]).await;
        let a = manager.ensure_session_container("s1", "o1").await.unwrap();
        let b = manager.ensure_session_container("s2", "o1").await.unwrap();
        let mut hosts: Vec<u16> = a.port_map.values().chain(b.port_map.values()).copied().collect();
        hosts.sort_unstable();
        hosts.dedup();
        assert_eq!(hosts.len(), 4);
        assert!(runtime.contains(&a.container_name));
        assert!(dir.path().join("sandboxes_meta.json").exists());
    }

    #[tokio::test]
    async fn ensure_is_idempotent_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        let first = manager.ensure_session_container("s1", "o1").await.unwrap();
        let second = manager.ensure_session_container("s1", "o1").await.unwrap();
        assert_eq!(first.container_id, second.container_id);
        assert_eq!(first.port_map, second.port_map);
        assert_eq!(manager.live_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn port_exhaustion_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        // Four usable host ports; two sessions with two exposed ports each
        // consume them all.
        let (manager, _runtime) =
            manager_with(dir.path(), (41000, 41003), vec![3000, 4173]).await;
        manager.ensure_session_container("s1", "o1").await.unwrap();
        manager.ensure_session_container("s2", "o1").await.unwrap();
        let err = manager
            .ensure_session_container("s3", "o1")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::PortsExhausted));
        // No partial state: no leaked ports, no metadata entry, no instance.
        assert_eq!(manager.ports.in_use_count(), 4);
        assert!(!manager.live_sessions().await.contains(&"s3".to_string()));
        let meta: BTreeMap<String, MetaEntry> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("sandboxes_meta.json")).unwrap(),
        )
        .unwrap();
        assert!(!meta.contains_key("s3"));
    }

    #[tokio::test]
    async fn port_collision_retries_and_surfaces_final_error() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        *runtime.fail_start_with.lock().unwrap() =
            Some("driver failed: port is already allocated".into());
        let err = manager
            .ensure_session_container("s1", "o1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("port is already allocated"));
        // All three attempts released their ports.
        assert_eq!(manager.ports.in_use_count(), 0);
    }

    #[tokio::test]
    async fn non_port_start_failures_do_not_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        *runtime.fail_start_with.lock().unwrap() = Some("image not found".into());
        let err = manager
            .ensure_session_container("s1", "o1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image not found"));
        assert_eq!(runtime.started_specs.lock().unwrap().len(), 0);
        assert_eq!(manager.ports.in_use_count(), 0);
    }

    #[tokio::test]
    async fn restart_recovery_reserves_inspected_ports() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(StubRuntime::new());
        let mut ports = BTreeMap::new();
        ports.insert(3000u16, 41000u16);
        runtime.seed_container(&ContainerManager::container_name("s1"), false, ports.clone());
        let manager = ContainerManager::new(
            test_config(dir.path(), (41000, 41010), vec![3000]),
            runtime,
        )
        .await
        .unwrap();
        let instance = manager.ensure_session_container("s1", "o1").await.unwrap();
        assert_eq!(instance.port_map, ports);
        assert_eq!(manager.ports.in_use_count(), 1);
    }

    #[tokio::test]
    async fn metadata_round_trips_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(StubRuntime::new());
        let port_map = {
            let manager = ContainerManager::new(
                test_config(dir.path(), (41000, 41010), vec![3000, 4173]),
                runtime.clone(),
            )
            .await
            .unwrap();
            manager
                .ensure_session_container("s1", "o1")
                .await
                .unwrap()
                .port_map
        };
        // New manager over the same metadata + still-alive container.
        let manager = ContainerManager::new(
            test_config(dir.path(), (41000, 41010), vec![3000, 4173]),
            runtime,
        )
        .await
        .unwrap();
        let instance = manager.get_instance("s1").await.unwrap();
        assert_eq!(instance.port_map, port_map);
        assert_eq!(manager.ports.in_use_count(), 2);
    }

    #[tokio::test]
    async fn stale_metadata_entries_are_discarded_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (manager, runtime) =
                manager_with(dir.path(), (41000, 41010), vec![3000]).await;
            manager.ensure_session_container("s1", "o1").await.unwrap();
            // Container vanishes out-of-band.
            runtime.containers.lock().unwrap().clear();
        }
        let (manager, _runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        assert!(manager.live_sessions().await.is_empty());
        assert_eq!(manager.ports.in_use_count(), 0);
    }

    #[tokio::test]
    async fn destroy_releases_ports_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        let instance = manager.ensure_session_container("s1", "o1").await.unwrap();
        assert!(manager.destroy_session_container("s1").await.unwrap());
        assert!(!runtime.contains(&instance.container_name));
        assert_eq!(manager.ports.in_use_count(), 0);
        assert!(!manager.destroy_session_container("s1").await.unwrap());
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped_and_recreated_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        let instance = manager.ensure_session_container("s1", "o1").await.unwrap();
        let reaped = manager
            .cleanup_idle(Some(instance.last_used + 70))
            .await;
        assert_eq!(reaped, vec!["s1".to_string()]);
        assert_eq!(manager.ports.in_use_count(), 0);
        // The next request builds a fresh instance.
        let fresh = manager.ensure_session_container("s1", "o1").await.unwrap();
        assert_ne!(fresh.container_id, instance.container_id);
    }

    #[tokio::test]
    async fn recently_active_sessions_survive_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        let instance = manager.ensure_session_container("s1", "o1").await.unwrap();
        let reaped = manager.cleanup_idle(Some(instance.last_used + 10)).await;
        assert!(reaped.is_empty());
        assert_eq!(manager.live_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn destroy_all_filters_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) =
            manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        manager.ensure_session_container("s1", "alice").await.unwrap();
        manager.ensure_session_container("s2", "bob").await.unwrap();
        let stopped = manager.destroy_all(Some("alice")).await.unwrap();
        assert_eq!(stopped, vec!["s1".to_string()]);
        assert_eq!(manager.live_sessions().await, vec!["s2".to_string()]);
    }

    #[tokio::test]
    async fn preview_urls_use_configured_host() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _runtime) = manager_with(dir.path(), (41000, 41010), vec![3000]).await;
        let instance = manager.ensure_session_container("s1", "o1").await.unwrap();
        let urls = manager.preview_urls(&instance);
        let url = urls.get(&3000).unwrap();
        assert!(url.starts_with("http://127.0.0.1:"));
    }
}
