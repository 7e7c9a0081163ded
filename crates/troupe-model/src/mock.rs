// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{LlmError, ModelProvider, TextStream};

/// Deterministic mock provider for tests.  Echoes the prompt back in two
/// chunks so token-streaming code paths are exercised.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream_generate(&self, prompt: &str) -> Result<TextStream, LlmError> {
        let chunks: Vec<Result<String, LlmError>> =
            vec![Ok("MOCK: ".to_string()), Ok(prompt.to_string())];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// One scripted response: the chunk sequence for a single `stream_generate`
/// call.  An `Err` item terminates the stream at that point.
pub type Script = Vec<Result<String, LlmError>>;

/// A pre-scripted mock provider.  Each call pops the next script from the
/// front of the queue, which lets tests specify exact chunk sequences —
/// including mid-stream provider failures — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    /// The prompts seen so far, in call order, so tests can inspect what was
    /// actually sent to the provider.
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: a script that streams the given text as a single chunk.
    pub fn text(reply: impl Into<String>) -> Script {
        vec![Ok(reply.into())]
    }

    /// Convenience: a script that streams `chunks` then fails.
    pub fn failing_after(chunks: Vec<&str>, message: impl Into<String>) -> Script {
        let mut script: Script = chunks.into_iter().map(|c| Ok(c.to_string())).collect();
        script.push(Err(LlmError::provider("scripted-mock", message)));
        script
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock"
    }

    async fn stream_generate(&self, prompt: &str) -> Result<TextStream, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::provider("scripted-mock", "script queue exhausted"))?;
        Ok(Box::pin(stream::iter(script)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn mock_provider_streams_prompt_back() {
        let provider = MockProvider;
        let mut stream = provider.stream_generate("hi").await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "MOCK: hi");
    }

    #[tokio::test]
    async fn scripted_mock_pops_scripts_in_order() {
        let provider = ScriptedMockProvider::new(vec![
            ScriptedMockProvider::text("first"),
            ScriptedMockProvider::text("second"),
        ]);
        let mut stream = provider.stream_generate("a").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        let mut stream = provider.stream_generate("b").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "second");
        assert_eq!(provider.remaining(), 0);
        assert_eq!(provider.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failing_script_errors_mid_stream() {
        let provider = ScriptedMockProvider::new(vec![ScriptedMockProvider::failing_after(
            vec!["one", "two"],
            "boom",
        )]);
        let mut stream = provider.stream_generate("x").await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn exhausted_scripts_fail_the_call() {
        let provider = ScriptedMockProvider::new(vec![]);
        assert!(provider.stream_generate("x").await.is_err());
    }
}
