// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod roles;
mod schema;

pub use loader::load;
pub use roles::{AgentRole, SenderKind};
pub use schema::{
    Config, LlmConfig, NodeConfig, SandboxConfig, StorageBackend, StoreConfig, WatcherConfig,
};
