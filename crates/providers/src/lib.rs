//! Inference backend implementations for Lyra.
//!
//! All backends implement the `lyra_core::InferenceBackend` trait.
//! [`build_backend`] wires the configured backend together.

pub mod capabilities;
pub mod ollama;

pub use capabilities::CachedBackend;
pub use ollama::OllamaBackend;

use lyra_config::AppConfig;
use lyra_core::InferenceBackend;
use lyra_core::error::ProviderError;
use std::sync::Arc;

/// Build the configured backend, wrapped in a capability cache when enabled.
pub fn build_backend(config: &AppConfig) -> Result<Arc<dyn InferenceBackend>, ProviderError> {
    let ollama: Arc<dyn InferenceBackend> = Arc::new(OllamaBackend::from_config(&config.ollama)?);
    if config.agent.cache_capabilities {
        Ok(Arc::new(CachedBackend::new(ollama)))
    } else {
        Ok(ollama)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_backend() {
        let backend = build_backend(&AppConfig::default()).unwrap();
        assert_eq!(backend.name(), "ollama");
    }
}
