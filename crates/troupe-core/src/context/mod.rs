// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod builder;
mod models;

pub use builder::ContextBuilder;
pub use models::{AgentContextView, SessionContext};

pub(crate) use builder::compress_text;
