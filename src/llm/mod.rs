//! `LlmBackend` trait — abstraction over LLM providers.
//!
//! Providers implement this narrow capability surface so the
//! orchestrator can be pointed at any supported backend via the
//! `[llm] provider` config field. Selection goes through a
//! name-to-implementation registry rather than inheritance.

pub mod ollama;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::CoreError;

pub use ollama::OllamaClient;

/// Narrow capability interface over an LLM provider.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a completion for `prompt` using `model`.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, CoreError>;

    /// Lists the models this backend can currently serve.
    async fn list_models(&self) -> Result<Vec<String>, CoreError>;

    /// Cheap availability probe; never errors, just reports.
    async fn health_check(&self) -> bool;

    /// Registry name, e.g. `"ollama"`.
    fn name(&self) -> &str;
}

/// Name-to-implementation registry for LLM backends.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Builds a registry with every known adapter for this config.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OllamaClient::new(config.clone())));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn LlmBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time verification that `LlmBackend` is object-safe.
    #[test]
    fn test_llm_backend_is_object_safe() {
        fn _assert_object_safe(_: &dyn LlmBackend) {}
    }

    #[test]
    fn test_registry_selects_by_name() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3.2:3b".to_string(),
            host: "http://127.0.0.1:11434".to_string(),
            api_key: None,
        };
        let registry = BackendRegistry::from_config(&config);
        assert!(registry.get("ollama").is_some());
        assert!(registry.get("unknown-provider").is_none());
        assert!(registry.names().contains(&"ollama".to_string()));
    }
}
