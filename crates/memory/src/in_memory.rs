//! In-process vector store: brute-force cosine similarity.
//!
//! Useful for tests and for running without a Chroma server. Nothing is
//! persisted.

use async_trait::async_trait;
use indexmap::IndexMap;
use lyra_core::error::VectorStoreError;
use lyra_core::vector_store::{Document, ScoredDocument, VectorStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// A vector store that keeps documents in memory, keyed by id.
///
/// Distances are reported as `1 - cosine_similarity`, matching Chroma's
/// cosine space.
pub struct InMemoryVectorStore {
    documents: Arc<RwLock<IndexMap<String, Document>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(IndexMap::new())),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>, VectorStoreError> {
        let documents = self.documents.read().await;

        let mut scored: Vec<ScoredDocument> = documents
            .values()
            .map(|doc| ScoredDocument {
                id: doc.id.clone(),
                text: doc.text.clone(),
                distance: 1.0 - cosine_similarity(&doc.embedding, embedding),
            })
            .collect();

        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn add(&self, documents: Vec<Document>) -> Result<(), VectorStoreError> {
        let mut stored = self.documents.write().await;
        for doc in documents {
            if doc.embedding.is_empty() {
                return Err(VectorStoreError::InsertFailed(format!(
                    "document '{}' has no embedding",
                    doc.id
                )));
            }
            stored.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.documents.read().await.len())
    }
}
