//! VectorStore trait: nearest-neighbour search over embedded documents.
//!
//! The store holds text chunks with their embeddings. Retrieval
//! augmentation and the `dataStoreSearch` tool query it; the ingestion
//! worker fills it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VectorStoreError;

/// A text chunk to index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique id, e.g. `notes.txt-3`
    pub id: String,

    /// The chunk text
    pub text: String,

    /// Embedding vector
    pub embedding: Vec<f32>,

    /// Free-form metadata (source file, chunk index)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A query hit. Lower `distance` means closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub distance: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// A human-readable name for this store (e.g., "chroma").
    fn name(&self) -> &str;

    /// Return up to `top_k` documents nearest to `embedding`, closest first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<ScoredDocument>, VectorStoreError>;

    /// Insert or replace documents.
    async fn add(&self, documents: Vec<Document>) -> std::result::Result<(), VectorStoreError>;

    /// Number of stored documents.
    async fn count(&self) -> std::result::Result<usize, VectorStoreError>;
}
