//! `POST /upload`: accept documents for background indexing.
//!
//! Files are identified by the SHA-256 of their bytes. A file whose hash was
//! seen before is a duplicate: it is not kept on disk and is reported back
//! with 409. Unique files are written to the upload directory and handed to
//! the ingest queue as one batch.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use lyra_core::{IngestBatch, IngestFile};

use crate::{ErrorResponse, SharedState};

/// Multipart field carrying the documents.
pub const FILES_FIELD: &str = "files";

/// Content hashes of every file accepted so far.
#[derive(Debug, Default)]
pub struct UploadRegistry {
    hashes: Mutex<HashSet<String>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash`. Returns `false` when it was already known.
    pub async fn claim(&self, hash: &str) -> bool {
        self.hashes.lock().await.insert(hash.to_string())
    }

    /// Forget `hash` so the same content can be uploaded again.
    pub async fn release(&self, hash: &str) {
        self.hashes.lock().await.remove(hash);
    }

    pub async fn len(&self) -> usize {
        self.hashes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hashes.lock().await.is_empty()
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
}

struct Received {
    name: String,
    mimetype: String,
    bytes: Vec<u8>,
}

pub(crate) async fn upload_handler(State(state): State<SharedState>, mut multipart: Multipart) -> Response {
    let mut received = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Malformed upload");
                return ErrorResponse::new(StatusCode::BAD_REQUEST, &format!("Malformed upload: {e}"));
            }
        };
        if field.name() != Some(FILES_FIELD) {
            debug!(field = ?field.name(), "Skipping unexpected multipart field");
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let mimetype = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        match field.bytes().await {
            Ok(bytes) => received.push(Received {
                name,
                mimetype,
                bytes: bytes.to_vec(),
            }),
            Err(e) => {
                warn!(file = %name, error = %e, "Upload interrupted");
                return ErrorResponse::new(StatusCode::BAD_REQUEST, &format!("Malformed upload: {e}"));
            }
        }
    }

    if received.is_empty() {
        return ErrorResponse::new(StatusCode::BAD_REQUEST, "No files uploaded.");
    }

    let upload_dir = &state.config.gateway.upload_dir;
    let mut batch = IngestBatch::default();
    let mut claimed = Vec::new();
    let mut duplicates = Vec::new();

    for file in received {
        let hash = content_hash(&file.bytes);
        debug!(file = %file.name, hash = %hash, "Hashed upload");

        if !state.uploads.claim(&hash).await {
            duplicates.push(file.name);
            continue;
        }
        claimed.push(hash);

        match store_upload(upload_dir, &file.bytes).await {
            Ok(path) => batch.files.push(IngestFile {
                path,
                original_name: file.name,
                mimetype: file.mimetype,
            }),
            Err(e) => {
                error!(file = %file.name, error = %e, "Could not store upload");
                abandon(&state, &claimed, &batch).await;
                return ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong!");
            }
        }
    }

    if !batch.is_empty() {
        let files = batch.len();
        let stored = batch.clone();
        if let Err(e) = state.ingest.enqueue(batch).await {
            error!(error = %e, "Could not queue uploads");
            abandon(&state, &claimed, &stored).await;
            return ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong!");
        }
        info!(files, "Queued uploads for indexing");
    }

    if !duplicates.is_empty() {
        warn!(duplicates = ?duplicates, "Duplicate uploads rejected");
        return ErrorResponse::new(
            StatusCode::CONFLICT,
            &format!("Duplicate files detected: {}", duplicates.join(", ")),
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            message: "Files uploaded. Processing in background.",
        }),
    )
        .into_response()
}

/// Undo a failed upload: release its hashes and remove what was written.
async fn abandon(state: &SharedState, claimed: &[String], stored: &IngestBatch) {
    for hash in claimed {
        state.uploads.release(hash).await;
    }
    for file in &stored.files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            warn!(path = %file.path.display(), error = %e, "Could not remove abandoned upload");
        }
    }
}

/// Write an upload under a fresh name and return its path.
async fn store_upload(dir: &Path, bytes: &[u8]) -> std::io::Result<std::path::PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(uuid::Uuid::new_v4().simple().to_string());
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
