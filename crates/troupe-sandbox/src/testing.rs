// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory [`ContainerRuntime`] for tests — no Docker required.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{ContainerRuntime, ContainerSpec, ExecOutput, SandboxError};

#[derive(Debug, Clone)]
pub struct StubContainer {
    pub id: String,
    pub running: bool,
    pub ports: BTreeMap<u16, u16>,
}

/// Scriptable stub runtime.
///
/// Containers live in a map keyed by name; `fail_start_with` makes the next
/// starts fail with the given message (e.g. "port is already allocated" to
/// exercise the retry path); `exec_results` queues scripted command results.
#[derive(Default)]
pub struct StubRuntime {
    pub containers: Mutex<HashMap<String, StubContainer>>,
    pub started_specs: Mutex<Vec<ContainerSpec>>,
    pub fail_start_with: Mutex<Option<String>>,
    pub exec_results: Mutex<VecDeque<Result<ExecOutput, SandboxError>>>,
    pub exec_commands: Mutex<Vec<String>>,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a container as if it survived a backend restart.
    pub fn seed_container(&self, name: &str, running: bool, ports: BTreeMap<u16, u16>) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            StubContainer {
                id: Uuid::new_v4().to_string(),
                running,
                ports,
            },
        );
    }

    pub fn queue_exec(&self, result: Result<ExecOutput, SandboxError>) {
        self.exec_results.lock().unwrap().push_back(result);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn start_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        if let Some(message) = self.fail_start_with.lock().unwrap().clone() {
            return Err(SandboxError::container(message));
        }
        let container = StubContainer {
            id: Uuid::new_v4().to_string(),
            running: true,
            ports: spec.port_map.clone(),
        };
        let id = container.id.clone();
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), container);
        self.started_specs.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn find_container(&self, name: &str) -> Result<Option<String>, SandboxError> {
        let mut containers = self.containers.lock().unwrap();
        Ok(containers.get_mut(name).map(|c| {
            c.running = true;
            c.id.clone()
        }))
    }

    async fn stop_container(&self, name: &str) -> Result<(), SandboxError> {
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn inspect_port_bindings(
        &self,
        name: &str,
    ) -> Result<BTreeMap<u16, u16>, SandboxError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.ports.clone())
            .unwrap_or_default())
    }

    async fn ensure_network(&self, _name: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn exec(
        &self,
        _name: &str,
        command: &str,
        _env: &[(String, String)],
        _timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError> {
        self.exec_commands.lock().unwrap().push(command.to_string());
        self.exec_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }))
    }
}
