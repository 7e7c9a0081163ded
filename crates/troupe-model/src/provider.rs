// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// A stream of text chunks from a provider.  A mid-stream `Err` terminates
/// the turn for the agent that requested it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The provider failed before or during streaming.  Aborts the turn.
    #[error("llm provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
    /// The requested provider name has no configured client.
    #[error("llm provider \"{0}\" is not configured")]
    UnknownProvider(String),
}

impl LlmError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// A streaming text generator.
///
/// Concrete HTTP clients (OpenAI-compatible, Anthropic, local runtimes) live
/// outside this crate; everything in-process programs against this trait.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name used for routing and status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users and the interaction log.
    fn model_name(&self) -> &str;

    /// Send a prompt and return a stream of response chunks.
    async fn stream_generate(&self, prompt: &str) -> Result<TextStream, LlmError>;
}
