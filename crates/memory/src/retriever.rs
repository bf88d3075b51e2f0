//! Similarity search over the vector store for a text query.
//!
//! Shared by retrieval augmentation and the `dataStoreSearch` tool: embed the
//! query with the embedding model, fetch the nearest chunks, and join them.

use lyra_config::AppConfig;
use lyra_core::error::VectorStoreError;
use lyra_core::{InferenceBackend, VectorStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct Retriever {
    backend: Arc<dyn InferenceBackend>,
    store: Arc<dyn VectorStore>,
    embedding_model: String,
    top_k: usize,
    separator: String,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn VectorStore>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store,
            embedding_model: embedding_model.into(),
            top_k: 1000,
            separator: "\n---\n".into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from `embedding_model` and the `[rag]` section.
    pub fn from_config(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn VectorStore>,
        config: &AppConfig,
    ) -> Self {
        Self::new(backend, store, config.embedding_model.clone())
            .with_top_k(config.rag.top_k)
            .with_separator(config.rag.separator.clone())
            .with_timeout(Duration::from_secs(config.rag.search_timeout_secs))
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Texts of the nearest chunks, closest first.
    pub async fn search(&self, query: &str) -> lyra_core::Result<Vec<String>> {
        let search = async {
            let embedding = self.backend.embed(&self.embedding_model, query).await?;
            let hits = self.store.query(&embedding, self.top_k).await?;
            Ok::<_, lyra_core::Error>(hits)
        };

        let hits = tokio::time::timeout(self.timeout, search)
            .await
            .map_err(|_| VectorStoreError::Timeout(self.timeout.as_secs()))??;

        debug!(store = self.store.name(), hits = hits.len(), "Vector search complete");
        Ok(hits.into_iter().map(|h| h.text).collect())
    }

    /// Nearest chunks joined by the separator, or `None` when nothing matched.
    pub async fn context(&self, query: &str) -> lyra_core::Result<Option<String>> {
        let texts = self.search(query).await?;
        if texts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(texts.join(&self.separator)))
        }
    }
}
