//! End-to-end integration tests for Lyra.
//!
//! These tests wire the real tool registry, vector store, ingest worker,
//! orchestrator and HTTP router together, with only the inference backend
//! scripted.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use lyra_agent::test_helpers::{Scripted, SequentialMockBackend, text_reply, tool_call, tool_reply};
use lyra_agent::dispatcher::frame_observation;
use lyra_agent::{DEFAULT_SESSION, TurnEvent, TurnRequest};
use lyra_config::AppConfig;
use lyra_core::message::Role;
use lyra_core::provider::StreamFragment;
use lyra_core::{IngestBatch, IngestFile, VectorStore};
use lyra_gateway::{GatewayState, Runtime, UploadRegistry, build_router};
use lyra_memory::{ChannelQueue, InMemoryVectorStore};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

// ── Wiring ───────────────────────────────────────────────────────────────

fn config(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.vector_store.backend = "memory".into();
    config.agent.max_depth = 3;
    config.gateway.upload_dir = dir.join("uploads");
    config.gateway.public_dir = dir.join("public");
    config.tts.enabled = false;
    config
}

fn runtime(backend: Arc<SequentialMockBackend>, config: &AppConfig) -> (Runtime, Arc<InMemoryVectorStore>) {
    let store = Arc::new(InMemoryVectorStore::new());
    (Runtime::with_parts(backend, store.clone(), config), store)
}

fn chat_body(content: &str, extra: serde_json::Value) -> Request<Body> {
    let mut body = serde_json::json!({
        "message": {"role": "user", "content": content},
        "model": "qwen3:8b",
        "useTTS": false
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Orchestration through the real tools ─────────────────────────────────

#[tokio::test]
async fn e2e_math_question_takes_one_tool_round() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(
        SequentialMockBackend::tool_then_answer(
            vec![tool_call("evaluateMathExpression", serde_json::json!({"expression": "2+2"}))],
            "</final_output>2 + 2 = 4",
        )
        .with_capabilities(&["completion", "tools"]),
    );
    let (runtime, _) = runtime(backend.clone(), &config);

    let outcome = runtime
        .orchestrator
        .run_turn(TurnRequest::new("qwen3:8b", "2+2"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.call_count(), 2);
    assert_eq!(outcome.tool_rounds, 1);
    assert!(outcome.content.contains('4'));

    // The first query offers every built-in tool.
    let offered: Vec<String> = backend.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(offered, ["dataStoreSearch", "evaluateMathExpression", "solveEquation"]);

    // system + user + request + tool + answer
    let history = runtime.orchestrator.sessions().snapshot(DEFAULT_SESSION).await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[3].role, Role::Tool);
    assert_eq!(history[3].content, frame_observation("4"));
}

#[tokio::test]
async fn e2e_equation_solver_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(
        SequentialMockBackend::tool_then_answer(
            vec![tool_call(
                "solveEquation",
                serde_json::json!({"equation": "x^2 + 3x - 4 = 0", "solveFor": "x"}),
            )],
            "x is -4 or 1.",
        )
        .with_capabilities(&["completion", "tools"]),
    );
    let (runtime, _) = runtime(backend.clone(), &config);

    runtime
        .orchestrator
        .run_turn(TurnRequest::new("qwen3:8b", "Solve x^2 + 3x - 4 = 0"), CancellationToken::new())
        .await
        .unwrap();

    let history = runtime.orchestrator.sessions().snapshot(DEFAULT_SESSION).await.unwrap();
    let tool = history.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool.tool_name.as_deref(), Some("solveEquation"));
    assert!(tool.content.contains("[-4,1]"));
}

#[tokio::test]
async fn e2e_unknown_tool_lists_the_builtin_tools() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(
        SequentialMockBackend::tool_then_answer(vec![tool_call("weather", serde_json::json!({}))], "Sorry.")
            .with_capabilities(&["completion", "tools"]),
    );
    let (runtime, _) = runtime(backend.clone(), &config);

    let outcome = runtime
        .orchestrator
        .run_turn(TurnRequest::new("qwen3:8b", "Weather?"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.content, "Sorry.");
    let history = runtime.orchestrator.sessions().snapshot(DEFAULT_SESSION).await.unwrap();
    let tool = history.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(
        tool.content,
        "weather is not a valid tool, try another available tool: dataStoreSearch, evaluateMathExpression, solveEquation"
    );
}

#[tokio::test]
async fn e2e_always_tool_backend_stops_at_configured_depth() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(
        SequentialMockBackend::always(tool_reply(
            "Still working",
            vec![tool_call("evaluateMathExpression", serde_json::json!({"expression": "1+1"}))],
        ))
        .with_capabilities(&["completion", "tools"]),
    );
    let (runtime, _) = runtime(backend.clone(), &config);

    let outcome = runtime
        .orchestrator
        .run_turn(TurnRequest::new("qwen3:8b", "Loop forever"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(backend.call_count(), config.agent.max_depth + 1);
    assert_eq!(outcome.tool_rounds, config.agent.max_depth);
    assert!(outcome.diagnostic.is_some());
    assert_eq!(outcome.content, "Still working");
}

#[tokio::test]
async fn e2e_system_message_survives_many_turns() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(SequentialMockBackend::always(text_reply("ok")).with_capabilities(&["completion", "tools"]));
    let (runtime, _) = runtime(backend, &config);

    for i in 0..4 {
        runtime
            .orchestrator
            .run_turn(TurnRequest::new("qwen3:8b", format!("turn {i}")), CancellationToken::new())
            .await
            .unwrap();
    }

    let history = runtime.orchestrator.sessions().snapshot(DEFAULT_SESSION).await.unwrap();
    assert_eq!(history.len(), 1 + 4 * 2);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history.iter().filter(|m| m.role == Role::System).count(), 1);
}

#[tokio::test]
async fn e2e_streamed_text_matches_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(SequentialMockBackend::new(vec![Scripted::Fragments(vec![
        StreamFragment {
            content: "Vega is ".into(),
            ..Default::default()
        },
        StreamFragment {
            content: "25 light years away.</final_".into(),
            ..Default::default()
        },
        StreamFragment {
            content: "output>".into(),
            done: true,
            ..Default::default()
        },
    ])]));
    let (runtime, _) = runtime(backend, &config);

    let mut rx = runtime
        .orchestrator
        .run_turn_stream(TurnRequest::new("qwen3:8b", "How far is Vega?"), CancellationToken::new());
    let mut streamed = String::new();
    let mut done = None;
    while let Some(event) = rx.recv().await {
        if let Some(text) = event.chunk_content() {
            streamed.push_str(text);
        }
        if let TurnEvent::Done { final_marker, .. } = event {
            done = Some(final_marker);
        }
    }

    assert_eq!(streamed, "Vega is 25 light years away.");
    assert_eq!(done, Some(true));
    let history = runtime.orchestrator.sessions().snapshot(DEFAULT_SESSION).await.unwrap();
    assert_eq!(history.last().unwrap().content, streamed);
}

// ── Ingestion and retrieval ──────────────────────────────────────────────

#[tokio::test]
async fn e2e_ingested_document_reaches_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(SequentialMockBackend::single_text("Vega."));
    let (runtime, store) = runtime(backend.clone(), &config);

    let path = dir.path().join("upload-1");
    std::fs::write(&path, "Lyra's brightest star is Vega.").unwrap();
    let report = runtime
        .ingest_worker(&config)
        .process_batch(IngestBatch {
            files: vec![IngestFile {
                path: path.clone(),
                original_name: "stars.txt".into(),
                mimetype: "text/plain".into(),
            }],
        })
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(!path.exists());

    runtime
        .orchestrator
        .run_turn(TurnRequest::new("qwen3:8b", "Brightest star?").with_rag(true), CancellationToken::new())
        .await
        .unwrap();

    let sent = &backend.requests()[0].messages;
    let user = sent.iter().find(|m| m.role == Role::User).unwrap();
    assert!(user.content.contains("Lyra's brightest star is Vega."));
    assert!(user.content.ends_with("Question: Brightest star?\nAnswer:"));
}

#[tokio::test]
async fn e2e_data_store_search_tool_reads_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(SequentialMockBackend::new(vec![]));
    let (runtime, store) = runtime(backend, &config);
    store
        .add(vec![lyra_core::Document::new("notes.txt-0", "The Lyre belonged to Orpheus.", vec![4.0, 1.0])])
        .await
        .unwrap();

    let result = runtime
        .tools
        .execute("dataStoreSearch", serde_json::json!({"query": "Whose lyre?"}))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.output.contains("The Lyre belonged to Orpheus."));
}

// ── Over HTTP ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_upload_then_ask_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(SequentialMockBackend::single_text("It is Vega."));
    let (runtime, store) = runtime(backend.clone(), &config);

    let (queue, rx) = ChannelQueue::new(4);
    let worker = runtime.ingest_worker(&config).start(rx);
    let state = Arc::new(GatewayState {
        orchestrator: runtime.orchestrator.clone(),
        ingest: Arc::new(queue),
        speech: None,
        uploads: UploadRegistry::new(),
        events: runtime.events.clone(),
        config,
    });
    let app = build_router(state);

    let boundary = "e2e-boundary";
    let upload = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"stars.md\"\r\nContent-Type: text/markdown\r\n\r\nLyra's brightest star is Vega.\r\n--{boundary}--\r\n"
        )))
        .unwrap();
    let response = app.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The worker indexes in the background.
    let mut indexed = false;
    for _ in 0..100 {
        if store.count().await.unwrap() > 0 {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(indexed, "upload was never indexed");

    let response = app
        .oneshot(chat_body("Brightest star?", serde_json::json!({"useRag": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["content"], "It is Vega.");

    let sent = &backend.requests()[0].messages;
    assert!(sent.iter().any(|m| m.content.contains("Lyra's brightest star is Vega.")));

    worker.abort();
}

#[tokio::test]
async fn e2e_sessions_are_isolated_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let backend = Arc::new(SequentialMockBackend::always(text_reply("noted")));
    let (runtime, _) = runtime(backend, &config);
    let orchestrator = runtime.orchestrator.clone();
    let (queue, _rx) = ChannelQueue::new(1);
    let app = build_router(Arc::new(GatewayState {
        orchestrator: runtime.orchestrator,
        ingest: Arc::new(queue),
        speech: None,
        uploads: UploadRegistry::new(),
        events: runtime.events.clone(),
        config,
    }));

    for (session, text) in [("alice", "one"), ("bob", "two"), ("alice", "three")] {
        let response = app
            .clone()
            .oneshot(chat_body(text, serde_json::json!({"sessionId": session})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let alice = orchestrator.sessions().snapshot("alice").await.unwrap();
    let bob = orchestrator.sessions().snapshot("bob").await.unwrap();
    assert_eq!(alice.len(), 5);
    assert_eq!(bob.len(), 3);
    assert!(bob.iter().all(|m| m.content != "one" && m.content != "three"));
}
