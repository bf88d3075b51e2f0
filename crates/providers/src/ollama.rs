//! Ollama backend over the native HTTP API.
//!
//! Endpoints used:
//! - `POST /api/chat` (buffered JSON, or newline-delimited JSON when streaming)
//! - `POST /api/show` for capability probes
//! - `GET /api/tags` for model listing
//! - `POST /api/embeddings`
//!
//! Ollama never sends tool call ids, so ids are assigned here as `call_<n>`
//! in the order calls appear within one request.

use async_trait::async_trait;
use futures::StreamExt;
use lyra_core::error::ProviderError;
use lyra_core::message::{Message, ToolCall};
use lyra_core::provider::*;
use lyra_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An Ollama inference backend.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
    /// Streaming requests run without an overall timeout; idle gaps are
    /// bounded by the consumer instead.
    stream_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a backend for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to create HTTP client: {e}")))?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            stream_client,
        })
    }

    /// Create a backend from the `[ollama]` config section.
    pub fn from_config(config: &lyra_config::OllamaConfig) -> Result<Self, ProviderError> {
        Self::new(&config.url, Duration::from_secs(config.request_timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to the Ollama wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                thinking: None,
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        function: ApiFunction {
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_name: m.tool_name.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools.iter().map(ToolDefinition::to_function_spec).collect()
    }

    fn chat_body(request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": stream,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if request.think {
            body["think"] = serde_json::json!(true);
        }

        body
    }

    async fn check_status(response: reqwest::Response, model: &str) -> Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(model.to_string()));
        }

        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Ollama returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Assigns `call_<n>` ids to tool calls that arrive without one.
#[derive(Debug, Default)]
struct CallIdAssigner {
    next: usize,
}

impl CallIdAssigner {
    fn convert(&mut self, calls: Vec<ApiToolCall>) -> Vec<ToolCall> {
        calls
            .into_iter()
            .map(|tc| {
                let id = format!("call_{}", self.next);
                self.next += 1;
                ToolCall::new(id, tc.function.name, serde_json::Value::Object(tc.function.arguments))
            })
            .collect()
    }
}

/// Splits a byte stream into complete NDJSON lines.
///
/// Bytes are buffered until a newline so a UTF-8 sequence split across
/// network chunks is decoded whole.
#[derive(Debug, Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(line) = decode_line(&raw[..line_end]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    fn finish(&mut self) -> Option<Result<String, ProviderError>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

/// Decode one line; blank lines yield nothing.
fn decode_line(raw: &[u8]) -> Option<Result<String, ProviderError>> {
    match std::str::from_utf8(raw) {
        Ok(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| Ok(text.to_string()))
        }
        Err(e) => Some(Err(ProviderError::MalformedResponse(format!(
            "stream line is not UTF-8: {e}"
        )))),
    }
}

/// Parse one streamed NDJSON line into a fragment.
fn parse_stream_line(line: &str, ids: &mut CallIdAssigner) -> Result<StreamFragment, ProviderError> {
    let chunk: ApiChatChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::MalformedResponse(format!("bad stream line: {e}")))?;

    if let Some(error) = chunk.error {
        return Err(ProviderError::StreamInterrupted(error));
    }

    let message = chunk.message.unwrap_or_default();
    Ok(StreamFragment {
        content: message.content,
        thinking: message.thinking.filter(|t| !t.is_empty()),
        tool_calls: ids.convert(message.tool_calls),
        done: chunk.done,
    })
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::chat_body(&request, false);

        debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), think = request.think, "Sending chat request");

        let response = self.client.post(&url).json(&body).send().await.map_err(map_send_error)?;
        let response = Self::check_status(response, &request.model).await?;

        let api_response: ApiChatChunk = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("failed to parse chat response: {e}")))?;

        if let Some(error) = api_response.error {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: error,
            });
        }

        let message = api_response
            .message
            .ok_or_else(|| ProviderError::MalformedResponse("no message in chat response".into()))?;

        let mut ids = CallIdAssigner::default();
        Ok(ChatReply {
            content: message.content,
            thinking: message.thinking.filter(|t| !t.is_empty()),
            tool_calls: ids.convert(message.tool_calls),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::chat_body(&request, true);

        debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), think = request.think, "Sending streaming chat request");

        let response = self
            .stream_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = Self::check_status(response, &request.model).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the NDJSON body and forward one fragment per line
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut ids = CallIdAssigner::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let parsed = line.and_then(|line| {
                        parse_stream_line(&line, &mut ids).inspect_err(|e| {
                            trace!(line = %line, error = %e, "Unusable stream line");
                        })
                    });
                    let done = matches!(&parsed, Ok(f) if f.done);
                    let failed = parsed.is_err();
                    if tx.send(parsed).await.is_err() {
                        return; // receiver dropped
                    }
                    if done || failed {
                        return;
                    }
                }
            }

            if let Some(line) = lines.finish() {
                let _ = tx.send(line.and_then(|line| parse_stream_line(&line, &mut ids))).await;
            }
        });

        Ok(rx)
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "prompt": text });

        debug!(model = %model, chars = text.len(), "Sending embedding request");

        let response = self.client.post(&url).json(&body).send().await.map_err(map_send_error)?;
        let response = Self::check_status(response, model).await?;

        let api_resp: ApiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("failed to parse embedding response: {e}")))?;

        if api_resp.embedding.is_empty() {
            return Err(ProviderError::MalformedResponse("no embedding returned".into()));
        }

        Ok(api_resp.embedding)
    }

    async fn describe_model(&self, model: &str) -> Result<ModelInfo, ProviderError> {
        let url = format!("{}/api/show", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await
            .map_err(map_send_error)?;
        let response = Self::check_status(response, model).await?;

        let info: ModelInfo = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("failed to parse model info: {e}")))?;

        debug!(model = %model, capabilities = ?info.capabilities, "Model capabilities");
        Ok(info)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_send_error)?;
        let response = Self::check_status(response, "").await?;

        let tags: ApiTags = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("failed to parse model list: {e}")))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Map<String, serde_json::Value>,
}

/// A `/api/chat` response body, or one line of a streamed one.
#[derive(Debug, Deserialize)]
struct ApiChatChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiTags {
    #[serde(default)]
    models: Vec<ApiModelTag>,
}

#[derive(Debug, Deserialize)]
struct ApiModelTag {
    name: String,
}
