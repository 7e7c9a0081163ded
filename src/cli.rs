// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "troupe",
    version,
    about = "Back-end node for a planner-led multi-agent coding assistant"
)]
pub struct Cli {
    /// Explicit config file (merged over the default search paths).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (otherwise RUST_LOG applies).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP/WebSocket node (the default when no command is given).
    Serve {
        /// Bind address override, e.g. 0.0.0.0:8080.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the merged configuration and exit.
    ShowConfig,
}
