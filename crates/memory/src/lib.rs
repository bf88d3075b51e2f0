//! Vector stores and document ingestion for Lyra.

pub mod chroma;
pub mod chunker;
pub mod in_memory;
pub mod ingest;
pub mod retriever;

pub use chroma::ChromaStore;
pub use chunker::TextChunker;
pub use in_memory::{InMemoryVectorStore, cosine_similarity};
pub use ingest::{ChannelQueue, IngestReport, IngestWorker};
pub use retriever::Retriever;

use lyra_config::AppConfig;
use lyra_core::VectorStore;
use lyra_core::error::VectorStoreError;
use std::sync::Arc;
use std::time::Duration;

/// Build the vector store named by `[vector_store].backend`.
pub fn build_vector_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.vector_store.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        _ => Ok(Arc::new(ChromaStore::new(
            &config.vector_store.url,
            &config.vector_store.collection,
            Duration::from_secs(config.rag.search_timeout_secs),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_configured_store() {
        let mut config = AppConfig::default();
        assert_eq!(build_vector_store(&config).unwrap().name(), "chroma");

        config.vector_store.backend = "memory".into();
        assert_eq!(build_vector_store(&config).unwrap().name(), "memory");
    }
}
