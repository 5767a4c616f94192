//! Provider registry — maps backend kinds to provider instances.
//!
//! Concrete provider adapters are registered by the embedding binary; the
//! daemon core only ever sees the [`LlmProvider`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use aw_domain::error::{Error, Result};

use crate::traits::LlmProvider;

/// Holds all registered LLM providers, keyed by backend kind.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a backend kind, replacing any previous one.
    pub fn register(&self, backend: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let backend = backend.into();
        tracing::info!(backend = %backend, provider = provider.provider_id(), "provider registered");
        self.providers.write().insert(backend, provider);
    }

    pub fn get(&self, backend: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(backend).cloned()
    }

    /// Like [`get`](Self::get), but with a daemon-friendly error.
    pub fn resolve(&self, backend: &str) -> Result<Arc<dyn LlmProvider>> {
        self.get(backend)
            .ok_or_else(|| Error::NotFound(format!("no provider for backend '{backend}'")))
    }

    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn register_and_resolve() {
        let reg = ProviderRegistry::new();
        assert!(reg.is_empty());

        reg.register("mock", Arc::new(MockProvider::echo()));
        assert_eq!(reg.len(), 1);
        assert!(reg.resolve("mock").is_ok());
        assert_eq!(reg.backends(), vec!["mock".to_string()]);
    }

    #[test]
    fn unknown_backend_errors() {
        let reg = ProviderRegistry::new();
        let err = reg.resolve("anthropic").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
