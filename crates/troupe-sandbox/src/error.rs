// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Failures of container lifecycle and command execution.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("no available host ports for sandbox binding")]
    PortsExhausted,
    #[error("sandbox port range is invalid")]
    InvalidPortRange,
    #[error("{0}")]
    Container(String),
    #[error("command timed out after {0}s")]
    Timeout(u64),
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("timeout must be positive")]
    InvalidTimeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn container(message: impl Into<String>) -> Self {
        Self::Container(message.into())
    }
}

/// Failures of workspace file access.
#[derive(Debug, thiserror::Error)]
pub enum FileAccessError {
    #[error("depth must be positive")]
    InvalidDepth,
    #[error("directory too large")]
    TooManyEntries,
    #[error("file not found")]
    NotFound,
    #[error("path escapes workspace")]
    PathEscape,
    #[error("path must name a file, not a directory")]
    IsDirectory,
    #[error("file exists; pass overwrite or append to replace it")]
    AlreadyExists,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
