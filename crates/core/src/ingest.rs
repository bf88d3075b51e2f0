//! Ingestion queue: hands uploaded files to the background indexer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::IngestError;

/// A file waiting to be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFile {
    /// Where the upload was written
    pub path: PathBuf,

    /// Name the client gave the file
    pub original_name: String,

    /// Declared content type
    pub mimetype: String,
}

/// One upload request's worth of files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestBatch {
    pub files: Vec<IngestFile>,
}

impl IngestBatch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
pub trait IngestQueue: Send + Sync {
    /// Queue a batch for background processing.
    async fn enqueue(&self, batch: IngestBatch) -> std::result::Result<(), IngestError>;
}
