//! `POST /chat`: one user turn, answered as JSON or as an SSE stream.
//!
//! The turn's cancellation token is tied to the response: when the client
//! disconnects, axum drops the handler (or the SSE body) and the guard
//! cancels the turn.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lyra_agent::{DEFAULT_SESSION, SpeechClient, TurnEvent, TurnRequest};

use crate::{ErrorResponse, SharedState};

/// The message the user typed.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: Option<IncomingMessage>,
    pub model: Option<String>,
    #[serde(default)]
    pub use_rag: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub use_tts: bool,
    pub voice: Option<String>,
    pub session_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerData {
    content: String,
    session_id: String,
    tool_rounds: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    message: &'static str,
    data: AnswerData,
}

pub(crate) async fn chat_handler(State(state): State<SharedState>, Json(body): Json<ChatBody>) -> Response {
    let (Some(message), Some(model)) = (body.message, body.model.filter(|m| !m.is_empty())) else {
        return ErrorResponse::new(StatusCode::BAD_REQUEST, "Missing question or model");
    };
    if message.role.as_deref().is_some_and(|r| r != "user") {
        warn!(role = ?message.role, "Ignoring non-user role on incoming message");
    }

    let session_id = body.session_id.unwrap_or_else(|| DEFAULT_SESSION.to_string());
    info!(session_id = %session_id, model = %model, use_rag = body.use_rag, stream = body.stream, "User message received");

    let request = TurnRequest::new(model, message.content)
        .with_session(session_id)
        .with_rag(body.use_rag);
    let speech = state.speech.clone().filter(|_| body.use_tts);
    let voice = body.voice.unwrap_or_default();

    if body.stream {
        stream_turn(state, request, speech, voice).into_response()
    } else {
        buffered_turn(state, request, speech, voice).await
    }
}

async fn buffered_turn(state: SharedState, request: TurnRequest, speech: Option<SpeechClient>, voice: String) -> Response {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let result = state.orchestrator.run_turn(request, cancel).await;
    guard.disarm();

    match result {
        Ok(outcome) => {
            if let Some(speech) = speech {
                speak_in_background(speech, voice, outcome.content.clone());
            }
            Json(ChatResponse {
                message: "Answer generated successfully.",
                data: AnswerData {
                    content: outcome.content,
                    session_id: outcome.session_id,
                    tool_rounds: outcome.tool_rounds,
                    diagnostic: outcome.diagnostic,
                },
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Chat turn failed");
            ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate answer.")
        }
    }
}

fn stream_turn(
    state: SharedState,
    request: TurnRequest,
    speech: Option<SpeechClient>,
    voice: String,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let rx = state.orchestrator.run_turn_stream(request, cancel);

    let mut spoken = String::new();
    let stream = ReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        match &event {
            TurnEvent::Chunk { message } => spoken.push_str(&message.content),
            TurnEvent::Done { .. } => {
                if let Some(speech) = &speech {
                    speak_in_background(speech.clone(), voice.clone(), std::mem::take(&mut spoken));
                }
            }
            _ => {}
        }
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().data(data))
    });

    Sse::new(stream)
}

/// Speak the answer without holding up the response. Failures are logged.
fn speak_in_background(speech: SpeechClient, voice: String, text: String) {
    tokio::spawn(async move {
        if let Err(e) = speech.speak(&voice, &text).await {
            warn!(error = %e, "Speech failed");
        }
    });
}
