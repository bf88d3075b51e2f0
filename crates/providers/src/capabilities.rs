//! Capability caching: wraps a backend and memoizes `describe_model`.
//!
//! Every turn probes the selected model before querying it. The answer only
//! changes when a model is re-pulled, so probes are cached per model name
//! until explicitly invalidated.

use async_trait::async_trait;
use lyra_core::error::ProviderError;
use lyra_core::provider::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A backend decorator that caches capability probes.
pub struct CachedBackend {
    inner: Arc<dyn InferenceBackend>,
    capabilities: RwLock<HashMap<String, ModelInfo>>,
}

impl CachedBackend {
    pub fn new(inner: Arc<dyn InferenceBackend>) -> Self {
        Self {
            inner,
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Forget the cached capabilities of one model.
    pub async fn invalidate(&self, model: &str) {
        if self.capabilities.write().await.remove(model).is_some() {
            debug!(model = %model, "Capability cache entry invalidated");
        }
    }

    /// Forget every cached probe.
    pub async fn clear(&self) {
        self.capabilities.write().await.clear();
    }

    /// Number of cached models.
    pub async fn cached_models(&self) -> usize {
        self.capabilities.read().await.len()
    }
}

#[async_trait]
impl InferenceBackend for CachedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        self.inner.chat(request).await
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError> {
        self.inner.chat_stream(request).await
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inner.embed(model, text).await
    }

    async fn describe_model(&self, model: &str) -> Result<ModelInfo, ProviderError> {
        if let Some(info) = self.capabilities.read().await.get(model) {
            return Ok(info.clone());
        }

        // Failed probes are not cached
        let info = self.inner.describe_model(model).await?;
        self.capabilities
            .write()
            .await
            .insert(model.to_string(), info.clone());
        Ok(info)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        probes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl InferenceBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn chat(&self, _request: ChatRequest) -> Result<ChatReply, ProviderError> {
            Ok(ChatReply::default())
        }

        async fn describe_model(&self, model: &str) -> Result<ModelInfo, ProviderError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::ModelNotFound(model.into()));
            }
            Ok(ModelInfo {
                capabilities: vec!["completion".into(), "tools".into()],
            })
        }
    }

    #[tokio::test]
    async fn probes_once_per_model() {
        let inner = Arc::new(CountingBackend::default());
        let cached = CachedBackend::new(inner.clone());

        for _ in 0..3 {
            assert!(cached.describe_model("qwen3").await.unwrap().supports_tools());
        }
        cached.describe_model("llama3.1").await.unwrap();

        assert_eq!(inner.probes.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_models().await, 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reprobe() {
        let inner = Arc::new(CountingBackend::default());
        let cached = CachedBackend::new(inner.clone());

        cached.describe_model("qwen3").await.unwrap();
        cached.invalidate("qwen3").await;
        cached.describe_model("qwen3").await.unwrap();

        assert_eq!(inner.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let inner = Arc::new(CountingBackend {
            fail: true,
            ..Default::default()
        });
        let cached = CachedBackend::new(inner.clone());

        assert!(cached.describe_model("missing").await.is_err());
        assert!(cached.describe_model("missing").await.is_err());
        assert_eq!(inner.probes.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_models().await, 0);
    }

    #[tokio::test]
    async fn delegates_name() {
        let cached = CachedBackend::new(Arc::new(CountingBackend::default()));
        assert_eq!(cached.name(), "counting");
        cached.clear().await;
    }
}
