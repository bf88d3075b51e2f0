//! Chroma vector store over its HTTP API (v2).
//!
//! The collection is created on first use (`get_or_create`) and its id is
//! cached for the lifetime of the store.

use async_trait::async_trait;
use lyra_core::error::VectorStoreError;
use lyra_core::vector_store::{Document, ScoredDocument, VectorStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const DATABASE_PATH: &str = "/api/v2/tenants/default_tenant/databases/default_database";

pub struct ChromaStore {
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
    client: reqwest::Client,
}

impl ChromaStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, timeout: Duration) -> Result<Self, VectorStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VectorStoreError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            collection_id: OnceCell::new(),
            client,
        })
    }

    fn collections_url(&self) -> String {
        format!("{}{}/collections", self.base_url, DATABASE_PATH)
    }

    async fn collection_id(&self) -> Result<&str, VectorStoreError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = serde_json::json!({
                    "name": self.collection,
                    "get_or_create": true,
                    "metadata": { "hnsw:space": "cosine" },
                });
                let response = self
                    .client
                    .post(self.collections_url())
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;
                let response = check_status(response).await.map_err(VectorStoreError::Unavailable)?;
                let collection: ApiCollection = response
                    .json()
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(format!("bad collection response: {e}")))?;
                debug!(collection = %self.collection, id = %collection.id, "Resolved Chroma collection");
                Ok::<_, VectorStoreError>(collection.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "Chroma returned error");
    Err(format!("status {}: {body}", status.as_u16()))
}

/// Flatten Chroma's batched query result (one row per query embedding).
fn flatten_query(result: ApiQueryResult) -> Vec<ScoredDocument> {
    let ids = result.ids.into_iter().next().unwrap_or_default();
    let documents = result
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let distances = result
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();

    ids.into_iter()
        .enumerate()
        .filter_map(|(i, id)| {
            let text = documents.get(i).cloned().flatten()?;
            let distance = distances.get(i).copied().flatten().unwrap_or(0.0);
            Some(ScoredDocument { id, text, distance })
        })
        .collect()
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>, VectorStoreError> {
        let id = self.collection_id().await?;
        let url = format!("{}/{id}/query", self.collections_url());
        let body = serde_json::json!({
            "query_embeddings": [embedding],
            "n_results": top_k,
            "include": ["documents", "distances"],
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorStoreError::QueryFailed(e.to_string()))?;
        let response = check_status(response).await.map_err(VectorStoreError::QueryFailed)?;
        let result: ApiQueryResult = response
            .json()
            .await
            .map_err(|e| VectorStoreError::QueryFailed(format!("bad query response: {e}")))?;

        let hits = flatten_query(result);
        debug!(hits = hits.len(), "Chroma query complete");
        Ok(hits)
    }

    async fn add(&self, documents: Vec<Document>) -> Result<(), VectorStoreError> {
        if documents.is_empty() {
            return Ok(());
        }

        let id = self.collection_id().await?;
        let url = format!("{}/{id}/upsert", self.collections_url());

        let mut batch = ApiUpsert::default();
        for doc in documents {
            batch.ids.push(doc.id);
            batch.documents.push(doc.text);
            batch.embeddings.push(doc.embedding);
            batch.metadatas.push((!doc.metadata.is_empty()).then_some(doc.metadata));
        }

        let response = self
            .client
            .post(&url)
            .json(&batch)
            .send()
            .await
            .map_err(|e| VectorStoreError::InsertFailed(e.to_string()))?;
        check_status(response).await.map_err(VectorStoreError::InsertFailed)?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        let id = self.collection_id().await?;
        let url = format!("{}/{id}/count", self.collections_url());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VectorStoreError::QueryFailed(e.to_string()))?;
        let response = check_status(response).await.map_err(VectorStoreError::QueryFailed)?;
        response
            .json::<usize>()
            .await
            .map_err(|e| VectorStoreError::QueryFailed(format!("bad count response: {e}")))
    }
}

// --- Chroma API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiCollection {
    id: String,
}

#[derive(Debug, Default, Serialize)]
struct ApiUpsert {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Option<serde_json::Map<String, serde_json::Value>>>,
}

#[derive(Debug, Deserialize)]
struct ApiQueryResult {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}
