// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use troupe_model::LlmError;

/// Turn-level agent failures.
///
/// A provider failure aborts the whole turn (already surfaced on the stream
/// by the time it propagates); tool failures never reach this type — they
/// are folded into the agent's output and the action log instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
