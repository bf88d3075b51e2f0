//! HTTP gateway for Lyra.
//!
//! Routes:
//!
//! - `GET  /health`: liveness
//! - `GET  /models`: chat models the backend serves
//! - `GET  /voices`: voices offered by the TTS service
//! - `POST /chat`: one user turn, JSON or SSE
//! - `POST /upload`: documents for background indexing
//! - `GET  /events`: live feed of domain events (SSE)
//! - anything else: static files from the public directory
//!
//! Built on Axum.

pub mod chat;
pub mod events;
pub mod frontend;
pub mod runtime;
pub mod upload;

pub use runtime::Runtime;
pub use upload::UploadRegistry;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use lyra_agent::{Orchestrator, SpeechClient};
use lyra_config::AppConfig;
use lyra_core::{EventBus, IngestQueue};
use lyra_memory::ChannelQueue;

/// Batches waiting for the ingest worker before uploads block.
const INGEST_QUEUE_CAPACITY: usize = 64;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub orchestrator: Orchestrator,
    pub ingest: Arc<dyn IngestQueue>,
    /// `None` when TTS is disabled
    pub speech: Option<SpeechClient>,
    pub uploads: UploadRegistry,
    /// Feed for `GET /events`; shared with the runtime
    pub events: Arc<EventBus>,
}

pub type SharedState = Arc<GatewayState>;

/// JSON error body: `{"error": "..."}`.
#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    pub(crate) fn new(status: StatusCode, message: &str) -> Response {
        (
            status,
            Json(Self {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the router with every route, the static fallback and the layers.
pub fn build_router(state: SharedState) -> Router {
    let public_dir = state.config.gateway.public_dir.clone();
    let max_body = state.config.gateway.max_body_bytes;
    let cors = cors_layer(state.config.gateway.port);

    Router::new()
        .route("/health", get(health_handler))
        .route("/models", get(models_handler))
        .route("/voices", get(voices_handler))
        .route("/chat", post(chat::chat_handler))
        .route("/upload", post(upload::upload_handler))
        .route("/events", get(events::events_handler))
        .with_state(state)
        .fallback_service(frontend::static_files(&public_dir))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Same-origin access from the browser UI on either loopback name.
fn cors_layer(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [format!("http://localhost:{port}"), format!("http://127.0.0.1:{port}")]
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
///
/// Builds the runtime once, starts the ingest worker, and serves until
/// Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let runtime = Runtime::from_config(&config)?;
    let (queue, rx) = ChannelQueue::new(INGEST_QUEUE_CAPACITY);
    let worker = runtime.ingest_worker(&config).start(rx);

    let speech = if config.tts.enabled {
        Some(SpeechClient::from_config(&config.tts)?)
    } else {
        None
    };

    let state = Arc::new(GatewayState {
        orchestrator: runtime.orchestrator,
        ingest: Arc::new(queue),
        speech,
        uploads: UploadRegistry::new(),
        events: runtime.events,
        config,
    });
    let app = build_router(state);

    info!(addr = %addr, "Lyra gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last queue handle; let the worker finish its batch.
    if let Err(e) = worker.await {
        warn!(error = %e, "Ingest worker ended abnormally");
    }
    info!("HTTP server closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, closing HTTP server");
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// Whether `name` is the configured embedding model, with or without a tag.
pub fn is_embedding_model(name: &str, embedding_model: &str) -> bool {
    let base = |n: &str| n.strip_suffix(":latest").unwrap_or(n).to_string();
    base(name) == base(embedding_model)
}

async fn models_handler(State(state): State<SharedState>) -> Response {
    match state.orchestrator.backend().list_models().await {
        Ok(models) => {
            let models: Vec<String> = models
                .into_iter()
                .filter(|m| !is_embedding_model(m, &state.config.embedding_model))
                .collect();
            info!(count = models.len(), "Model list requested");
            Json(ModelsResponse { models }).into_response()
        }
        Err(e) => {
            error!(error = %e, "Model list failed");
            ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list models.")
        }
    }
}

#[derive(Serialize)]
struct VoicesResponse {
    voices: serde_json::Value,
}

async fn voices_handler(State(state): State<SharedState>) -> Response {
    let Some(speech) = &state.speech else {
        warn!("Voice list requested but TTS is disabled");
        return ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list voices.");
    };

    match speech.voices().await {
        Ok(voices) => {
            info!("Voice list requested");
            Json(VoicesResponse { voices }).into_response()
        }
        Err(e) => {
            error!(error = %e, "Voice list failed");
            ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list voices.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use lyra_agent::test_helpers::{Scripted, SequentialMockBackend, text_reply, tool_call, tool_reply};
    use lyra_core::error::ProviderError;
    use lyra_core::provider::{ChatReply, ChatRequest, ModelInfo, StreamFragment};
    use lyra_core::{IngestBatch, InferenceBackend};
    use lyra_memory::InMemoryVectorStore;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        batches: mpsc::Receiver<IngestBatch>,
        state: SharedState,
        _dir: tempfile::TempDir,
    }

    fn harness(backend: Arc<dyn InferenceBackend>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.vector_store.backend = "memory".into();
        config.gateway.upload_dir = dir.path().join("uploads");
        config.gateway.public_dir = dir.path().join("public");
        config.tts.enabled = false;

        let runtime = Runtime::with_parts(backend, Arc::new(InMemoryVectorStore::new()), &config);
        let (queue, batches) = ChannelQueue::new(8);
        let state = Arc::new(GatewayState {
            orchestrator: runtime.orchestrator,
            ingest: Arc::new(queue),
            speech: None,
            uploads: UploadRegistry::new(),
            events: runtime.events,
            config,
        });

        Harness {
            app: build_router(state.clone()),
            batches,
            state,
            _dir: dir,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const BOUNDARY: &str = "lyra-test-boundary";

    fn multipart(files: &[(&str, &str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, mimetype, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: {mimetype}\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    struct DownBackend;

    #[async_trait]
    impl InferenceBackend for DownBackend {
        fn name(&self) -> &str {
            "down"
        }
        async fn chat(&self, _request: ChatRequest) -> Result<ChatReply, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
        async fn describe_model(&self, _model: &str) -> Result<ModelInfo, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let h = harness(Arc::new(SequentialMockBackend::new(vec![])));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[test]
    fn embedding_model_matches_with_or_without_tag() {
        assert!(is_embedding_model("nomic-embed-text:latest", "nomic-embed-text"));
        assert!(is_embedding_model("nomic-embed-text", "nomic-embed-text:latest"));
        assert!(!is_embedding_model("qwen3:8b", "nomic-embed-text"));
        assert!(!is_embedding_model("nomic-embed-text:v1.5", "nomic-embed-text"));
    }

    #[tokio::test]
    async fn models_hides_the_embedding_model() {
        let backend = SequentialMockBackend::new(vec![]).with_models(&[
            "qwen3:8b",
            "nomic-embed-text:latest",
            "llama3.2:latest",
        ]);
        let h = harness(Arc::new(backend));
        let req = Request::builder().uri("/models").body(Body::empty()).unwrap();

        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"models": ["qwen3:8b", "llama3.2:latest"]})
        );
    }

    #[tokio::test]
    async fn models_failure_is_500() {
        let h = harness(Arc::new(DownBackend));
        let req = Request::builder().uri("/models").body(Body::empty()).unwrap();

        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Failed to list models.");
    }

    #[tokio::test]
    async fn voices_without_tts_is_500() {
        let h = harness(Arc::new(SequentialMockBackend::new(vec![])));
        let req = Request::builder().uri("/voices").body(Body::empty()).unwrap();

        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Failed to list voices.");
    }

    #[tokio::test]
    async fn chat_requires_message_and_model() {
        let h = harness(Arc::new(SequentialMockBackend::single_text("unused")));

        let response = h
            .app
            .clone()
            .oneshot(post_json("/chat", serde_json::json!({"model": "qwen3:8b"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Missing question or model");

        let response = h
            .app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"message": {"role": "user", "content": "hi"}, "model": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_returns_the_answer() {
        let h = harness(Arc::new(SequentialMockBackend::single_text("Hello, traveller.")));

        let response = h
            .app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"message": {"role": "user", "content": "hi"}, "model": "qwen3:8b"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["message"], "Answer generated successfully.");
        assert_eq!(json["data"]["content"], "Hello, traveller.");
        assert_eq!(json["data"]["sessionId"], "default");
        assert_eq!(json["data"]["toolRounds"], 0);
    }

    #[tokio::test]
    async fn events_feed_reports_turns() {
        let h = harness(Arc::new(SequentialMockBackend::single_text("Hello.")));
        let feed = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(feed.status(), StatusCode::OK);
        assert_eq!(feed.headers()["content-type"], "text/event-stream");

        let response = h
            .app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"message": {"role": "user", "content": "hi"}, "model": "qwen3:8b"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = feed.into_body();
        let frame = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let frame = String::from_utf8(frame.to_vec()).unwrap();
        assert!(frame.starts_with("event: turn_started\n"), "{frame}");
        assert!(frame.contains("\"session_id\":\"default\""), "{frame}");
    }

    #[tokio::test]
    async fn chat_runs_tools_and_keeps_session_history() {
        let backend = SequentialMockBackend::new(vec![
            Scripted::Reply(tool_reply("", vec![tool_call("evaluateMathExpression", serde_json::json!({"expression": "2+2"}))])),
            Scripted::Reply(text_reply("2+2 is 4.")),
        ])
        .with_capabilities(&["completion", "tools"]);
        let h = harness(Arc::new(backend));

        let response = h
            .app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({
                    "message": {"role": "user", "content": "What is 2+2?"},
                    "model": "qwen3:8b",
                    "sessionId": "s1",
                    "useTTS": false
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["content"], "2+2 is 4.");
        assert_eq!(json["data"]["toolRounds"], 1);

        let history = h.state.orchestrator.sessions().snapshot("s1").await.unwrap();
        // system, user, tool request, tool result, answer
        assert_eq!(history.len(), 5);
        assert!(history[3].content.contains("Observation: 4"));
    }

    #[tokio::test]
    async fn chat_backend_failure_is_500() {
        let backend = SequentialMockBackend::new(vec![Scripted::Fail(ProviderError::ModelNotFound("qwen3:8b".into()))]);
        let h = harness(Arc::new(backend));

        let response = h
            .app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"message": {"role": "user", "content": "hi"}, "model": "qwen3:8b"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Failed to generate answer.");
    }

    #[tokio::test]
    async fn chat_stream_sends_sse_data_frames() {
        let backend = SequentialMockBackend::new(vec![Scripted::Fragments(vec![
            StreamFragment {
                content: "Hel".into(),
                ..Default::default()
            },
            StreamFragment {
                content: "lo".into(),
                done: true,
                ..Default::default()
            },
        ])]);
        let h = harness(Arc::new(backend));

        let response = h
            .app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({
                    "message": {"role": "user", "content": "hi"},
                    "model": "qwen3:8b",
                    "stream": true
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let text = body_text(response).await;
        let events: Vec<serde_json::Value> = text
            .split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        let content: String = events
            .iter()
            .filter(|e| e["type"] == "chunk")
            .map(|e| e["message"]["content"].as_str().unwrap())
            .collect();
        assert_eq!(content, "Hello");
        assert_eq!(events.last().unwrap()["type"], "done");
    }

    #[tokio::test]
    async fn upload_queues_unique_files() {
        let mut h = harness(Arc::new(SequentialMockBackend::new(vec![])));

        let response = h
            .app
            .oneshot(multipart(&[("notes.txt", "text/plain", "Vega is bright.")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            body_json(response).await["message"],
            "Files uploaded. Processing in background."
        );

        let batch = h.batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.files[0].original_name, "notes.txt");
        assert_eq!(batch.files[0].mimetype, "text/plain");
        assert_eq!(std::fs::read_to_string(&batch.files[0].path).unwrap(), "Vega is bright.");
    }

    #[tokio::test]
    async fn duplicate_upload_is_409_with_names() {
        let mut h = harness(Arc::new(SequentialMockBackend::new(vec![])));

        let first = h
            .app
            .clone()
            .oneshot(multipart(&[("a.txt", "text/plain", "same bytes")]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        h.batches.recv().await.unwrap();

        let second = h
            .app
            .oneshot(multipart(&[
                ("b.txt", "text/plain", "same bytes"),
                ("c.txt", "text/plain", "new bytes"),
            ]))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(second).await["error"], "Duplicate files detected: b.txt");

        // The unique file in the same request is still indexed.
        let batch = h.batches.recv().await.unwrap();
        assert_eq!(batch.files.len(), 1);
        assert_eq!(batch.files[0].original_name, "c.txt");
        assert_eq!(h.state.uploads.len().await, 2);
    }

    #[tokio::test]
    async fn failed_store_does_not_mark_file_as_seen() {
        let mut h = harness(Arc::new(SequentialMockBackend::new(vec![])));
        let upload_dir = h.state.config.gateway.upload_dir.clone();
        // A plain file where the directory should be makes the write fail.
        std::fs::write(&upload_dir, "in the way").unwrap();

        let first = h
            .app
            .clone()
            .oneshot(multipart(&[("doc.txt", "text/plain", "doc")]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(h.state.uploads.is_empty().await);

        std::fs::remove_file(&upload_dir).unwrap();
        let retry = h
            .app
            .oneshot(multipart(&[("doc.txt", "text/plain", "doc")]))
            .await
            .unwrap();
        assert_eq!(retry.status(), StatusCode::ACCEPTED);
        assert_eq!(h.batches.recv().await.unwrap().files[0].original_name, "doc.txt");
    }

    #[tokio::test]
    async fn closed_queue_releases_hashes_and_removes_files() {
        let mut h = harness(Arc::new(SequentialMockBackend::new(vec![])));
        h.batches.close();

        let response = h
            .app
            .oneshot(multipart(&[
                ("a.txt", "text/plain", "alpha"),
                ("b.txt", "text/plain", "beta"),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Something went wrong!");

        assert!(h.state.uploads.is_empty().await);
        let left = std::fs::read_dir(&h.state.config.gateway.upload_dir).unwrap().count();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn upload_without_files_is_400() {
        let h = harness(Arc::new(SequentialMockBackend::new(vec![])));

        let response = h.app.oneshot(multipart(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No files uploaded.");
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_static_files() {
        let h = harness(Arc::new(SequentialMockBackend::new(vec![])));
        let public = h.state.config.gateway.public_dir.clone();
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join("index.html"), "<title>Lyra</title>").unwrap();

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<title>Lyra</title>");
    }
}
