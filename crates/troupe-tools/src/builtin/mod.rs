// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod file_read;
mod file_write;
mod shell;
mod web_search;

use std::sync::Arc;

use troupe_sandbox::{FileService, SandboxCommandService};

pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use shell::SandboxShellTool;
pub use web_search::WebSearchTool;

use crate::{StreamToolCallHook, ToolExecutor};

/// Build the default executor with the four built-in tools and the
/// tool-call stream hook.
pub fn build_tool_executor(
    files: Arc<FileService>,
    commands: Arc<SandboxCommandService>,
) -> ToolExecutor {
    let mut executor = ToolExecutor::new();
    executor.register(FileWriteTool::new(files.clone()));
    executor.register(FileReadTool::new(files));
    executor.register(SandboxShellTool::new(commands));
    executor.register(WebSearchTool::new());
    executor.add_hook(StreamToolCallHook);
    executor
}
