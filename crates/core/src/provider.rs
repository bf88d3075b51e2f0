//! InferenceBackend trait: the abstraction over the model server.
//!
//! A backend knows how to send a conversation to a model and get a reply
//! back, either buffered or as a stream of fragments. It also answers
//! capability probes, lists models and produces embeddings.
//!
//! Implementations: Ollama.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;

/// A single chat query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "qwen3:8b", "llama3.1")
    pub model: String,

    /// The full conversation history, system message first
    pub messages: Vec<Message>,

    /// Tools the model may call; empty means tools are not offered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Request extended reasoning output
    #[serde(default)]
    pub think: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            stream: false,
            think: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_think(mut self, think: bool) -> Self {
        self.think = think;
        self
    }
}

/// A complete (non-streaming) reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatReply {
    /// Answer text
    #[serde(default)]
    pub content: String,

    /// Reasoning text, when the model produced any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Tool invocations requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl ChatReply {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One incremental piece of a streamed reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFragment {
    /// Partial content delta
    #[serde(default)]
    pub content: String,

    /// Partial reasoning delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Complete tool calls (Ollama never splits a call across fragments)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Whether this is the final fragment
    #[serde(default)]
    pub done: bool,
}

impl StreamFragment {
    /// A plain content fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A reasoning-only fragment.
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self {
            thinking: Some(thinking.into()),
            ..Default::default()
        }
    }

    /// Whether the fragment carries reasoning text.
    pub fn has_thinking(&self) -> bool {
        self.thinking.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// What the backend says a model can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Capability tags, e.g. `completion`, `tools`, `thinking`, `embedding`
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelInfo {
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn supports_tools(&self) -> bool {
        self.has("tools")
    }

    pub fn supports_thinking(&self) -> bool {
        self.has("thinking")
    }
}

/// Receiving half of a streamed reply.
pub type FragmentStream = mpsc::Receiver<std::result::Result<StreamFragment, ProviderError>>;

/// The core InferenceBackend trait.
///
/// The orchestrator calls `chat()` or `chat_stream()` without knowing which
/// server is behind it.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete reply.
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatReply, ProviderError>;

    /// Send a request and get a stream of reply fragments.
    ///
    /// Default implementation calls `chat()` and wraps the result as a single fragment.
    async fn chat_stream(&self, request: ChatRequest) -> std::result::Result<FragmentStream, ProviderError> {
        let reply = self.chat(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamFragment {
                content: reply.content,
                thinking: reply.thinking,
                tool_calls: reply.tool_calls,
                done: true,
            }))
            .await;
        Ok(rx)
    }

    /// Embed a single text with the given model.
    async fn embed(&self, _model: &str, _text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        Err(ProviderError::NotSupported(format!(
            "backend '{}' does not produce embeddings",
            self.name()
        )))
    }

    /// Describe a model's capabilities.
    async fn describe_model(&self, model: &str) -> std::result::Result<ModelInfo, ProviderError>;

    /// List the models the backend can serve.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}
