//! Background ingestion: uploaded files → chunks → embeddings → vector store.
//!
//! [`ChannelQueue`] is the producer side handed to the HTTP layer;
//! [`IngestWorker::start`] drains it on a background task. Only plain-text
//! documents are indexed; other types are skipped with a warning. Each file
//! is removed once processed, whatever the outcome.

use async_trait::async_trait;
use chrono::Utc;
use lyra_core::error::IngestError;
use lyra_core::ingest::{IngestBatch, IngestFile, IngestQueue};
use lyra_core::vector_store::{Document, VectorStore};
use lyra_core::{DomainEvent, EventBus, InferenceBackend};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chunker::TextChunker;

/// Documents per `VectorStore::add` call.
const ADD_BATCH_SIZE: usize = 5000;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "log"];

/// Whether a file can be ingested as plain text.
pub fn is_plain_text(file: &IngestFile) -> bool {
    if file.mimetype.starts_with("text/") || file.mimetype == "application/json" {
        return true;
    }
    Path::new(&file.original_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// An [`IngestQueue`] backed by a tokio mpsc channel.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<IngestBatch>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<IngestBatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl IngestQueue for ChannelQueue {
    async fn enqueue(&self, batch: IngestBatch) -> Result<(), IngestError> {
        self.tx.send(batch).await.map_err(|_| IngestError::QueueClosed)
    }
}

/// What one batch produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks: usize,
}

/// Drains ingestion batches into a vector store.
pub struct IngestWorker {
    backend: Arc<dyn InferenceBackend>,
    store: Arc<dyn VectorStore>,
    embedding_model: String,
    chunker: TextChunker,
    events: Option<Arc<EventBus>>,
}

impl IngestWorker {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn VectorStore>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store,
            embedding_model: embedding_model.into(),
            chunker: TextChunker::default(),
            events: None,
        }
    }

    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawn the worker loop. It ends when every queue handle is dropped.
    pub fn start(self, mut rx: mpsc::Receiver<IngestBatch>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let files = batch.len();
                match self.process_batch(batch).await {
                    Ok(report) => info!(files, indexed = report.files_indexed, skipped = report.files_skipped, chunks = report.chunks, "Ingest batch complete"),
                    Err(e) => {
                        error!(files, error = %e, "Ingest batch failed");
                        self.publish(DomainEvent::ErrorOccurred {
                            context: "ingest".into(),
                            error_message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
            debug!("Ingest queue closed, worker exiting");
        })
    }

    /// Chunk, embed and store every file in the batch.
    pub async fn process_batch(&self, batch: IngestBatch) -> lyra_core::Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut documents = Vec::new();

        for file in batch.files {
            match self.documents_for(&file).await {
                Ok(Some(mut docs)) => {
                    report.files_indexed += 1;
                    report.chunks += docs.len();
                    self.publish(DomainEvent::DocumentsIngested {
                        source: file.original_name.clone(),
                        chunks: docs.len(),
                        timestamp: Utc::now(),
                    });
                    documents.append(&mut docs);
                }
                Ok(None) => report.files_skipped += 1,
                Err(e) => {
                    report.files_skipped += 1;
                    error!(file = %file.original_name, error = %e, "Failed to process file");
                }
            }

            if let Err(e) = tokio::fs::remove_file(&file.path).await {
                warn!(path = %file.path.display(), error = %e, "Could not delete processed upload");
            }
        }

        for batch in documents.chunks(ADD_BATCH_SIZE) {
            self.store.add(batch.to_vec()).await?;
        }

        Ok(report)
    }

    async fn documents_for(&self, file: &IngestFile) -> lyra_core::Result<Option<Vec<Document>>> {
        if !is_plain_text(file) {
            warn!(file = %file.original_name, mimetype = %file.mimetype, "Skipping unsupported document type");
            return Ok(None);
        }

        let bytes = tokio::fs::read(&file.path).await.map_err(|e| IngestError::Read {
            path: file.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let text = String::from_utf8_lossy(&bytes);

        let base = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.original_name.clone());

        let chunks = self.chunker.split(&text);
        debug!(file = %file.original_name, chunks = chunks.len(), "Split document");

        let mut documents = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let embedding = self.backend.embed(&self.embedding_model, &chunk).await?;
            documents.push(
                Document::new(format!("{base}-{i}"), chunk, embedding)
                    .with_metadata("source", file.original_name.clone())
                    .with_metadata("chunk", i),
            );
        }
        Ok(Some(documents))
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryVectorStore;
    use lyra_core::error::ProviderError;
    use lyra_core::provider::{ChatReply, ChatRequest, ModelInfo};
    use std::path::PathBuf;

    /// Embeds text as `[len, 1.0]`.
    struct LengthEmbedder;

    #[async_trait]
    impl InferenceBackend for LengthEmbedder {
        fn name(&self) -> &str {
            "length"
        }
        async fn chat(&self, _request: ChatRequest) -> Result<ChatReply, ProviderError> {
            Ok(ChatReply::default())
        }
        async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![text.len() as f32, 1.0])
        }
        async fn describe_model(&self, _model: &str) -> Result<ModelInfo, ProviderError> {
            Ok(ModelInfo::default())
        }
    }

    fn upload(dir: &Path, stored: &str, original: &str, mimetype: &str, content: &str) -> IngestFile {
        let path = dir.join(stored);
        std::fs::write(&path, content).unwrap();
        IngestFile {
            path,
            original_name: original.into(),
            mimetype: mimetype.into(),
        }
    }

    #[test]
    fn plain_text_detection() {
        let file = |name: &str, mime: &str| IngestFile {
            path: PathBuf::from(name),
            original_name: name.into(),
            mimetype: mime.into(),
        };
        assert!(is_plain_text(&file("a.txt", "text/plain")));
        assert!(is_plain_text(&file("notes.MD", "application/octet-stream")));
        assert!(is_plain_text(&file("data", "application/json")));
        assert!(!is_plain_text(&file("paper.pdf", "application/pdf")));
    }

    #[tokio::test]
    async fn batch_indexes_text_and_skips_binary() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryVectorStore::new());
        let worker = IngestWorker::new(Arc::new(LengthEmbedder), store.clone(), "nomic-embed-text")
            .with_chunker(TextChunker::new(50, 10));

        let text = upload(dir.path(), "abc-notes.txt", "notes.txt", "text/plain", &"moon ".repeat(40));
        let pdf = upload(dir.path(), "def-paper.pdf", "paper.pdf", "application/pdf", "%PDF");
        let text_path = text.path.clone();
        let pdf_path = pdf.path.clone();

        let report = worker
            .process_batch(IngestBatch { files: vec![text, pdf] })
            .await
            .unwrap();

        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_skipped, 1);
        assert!(report.chunks > 1);
        assert_eq!(store.count().await.unwrap(), report.chunks);
        assert!(!text_path.exists());
        assert!(!pdf_path.exists());

        let hits = store.query(&[50.0, 1.0], 1000).await.unwrap();
        assert!(hits.iter().any(|h| h.id == "abc-notes.txt-0"));
    }

    #[tokio::test]
    async fn missing_file_is_skipped() {
        let store = Arc::new(InMemoryVectorStore::new());
        let worker = IngestWorker::new(Arc::new(LengthEmbedder), store.clone(), "nomic-embed-text");
        let report = worker
            .process_batch(IngestBatch {
                files: vec![IngestFile {
                    path: PathBuf::from("/nonexistent/upload.txt"),
                    original_name: "upload.txt".into(),
                    mimetype: "text/plain".into(),
                }],
            })
            .await
            .unwrap();
        assert_eq!(report.files_skipped, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queue_feeds_worker() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryVectorStore::new());
        let events = Arc::new(EventBus::default());
        let mut rx_events = events.subscribe();

        let (queue, rx) = ChannelQueue::new(4);
        let handle = IngestWorker::new(Arc::new(LengthEmbedder), store.clone(), "nomic-embed-text")
            .with_events(events)
            .start(rx);

        let file = upload(dir.path(), "x-facts.md", "facts.md", "text/markdown", "Lyra likes moons.");
        queue.enqueue(IngestBatch { files: vec![file] }).await.unwrap();

        let event = rx_events.recv().await.unwrap();
        assert!(matches!(event.as_ref(), DomainEvent::DocumentsIngested { chunks: 1, .. }));

        drop(queue);
        handle.await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn closed_queue_reports_error() {
        let (queue, rx) = ChannelQueue::new(1);
        drop(rx);
        let err = queue.enqueue(IngestBatch::default()).await.unwrap_err();
        assert!(matches!(err, IngestError::QueueClosed));
    }
}
