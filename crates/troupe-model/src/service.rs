// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use troupe_config::{AgentRole, LlmConfig};

use crate::{LlmError, ModelProvider, TextStream};

/// Routes generation requests to named providers.
///
/// Providers are registered once at startup; the role→provider mapping comes
/// from configuration so deployments can pin e.g. the engineer to a stronger
/// model without code changes.
pub struct LlmService {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    default_provider: String,
    role_providers: HashMap<AgentRole, String>,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: config.default_provider.clone(),
            role_providers: config.role_providers.clone(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Provider name configured for the given role.
    pub fn provider_name_for(&self, role: AgentRole) -> &str {
        self.role_providers
            .get(&role)
            .map(String::as_str)
            .unwrap_or(&self.default_provider)
    }

    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn ModelProvider>, LlmError> {
        let key = name.unwrap_or(&self.default_provider).to_lowercase();
        self.providers
            .get(&key)
            .cloned()
            .ok_or(LlmError::UnknownProvider(key))
    }

    /// Stream a completion from the named (or default) provider.
    pub async fn stream_generate(
        &self,
        provider: Option<&str>,
        prompt: &str,
    ) -> Result<TextStream, LlmError> {
        let selected = self.get(provider)?;
        selected.stream_generate(prompt).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;

    fn config() -> LlmConfig {
        let mut config = LlmConfig::default();
        config.default_provider = "mock".into();
        config
            .role_providers
            .insert(AgentRole::Engineer, "special".into());
        config
    }

    #[test]
    fn role_routing_falls_back_to_default() {
        let service = LlmService::new(&config());
        assert_eq!(service.provider_name_for(AgentRole::Engineer), "special");
        assert_eq!(service.provider_name_for(AgentRole::Planner), "mock");
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let service = LlmService::new(&config());
        assert!(matches!(
            service.get(Some("nope")),
            Err(LlmError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn generate_routes_to_registered_provider() {
        let service =
            LlmService::new(&config()).with_provider(Arc::new(MockProvider::default()));
        let stream = service.stream_generate(None, "hello").await;
        assert!(stream.is_ok());
    }
}
