//! Scripted backends for orchestrator, gateway and end-to-end tests.

use async_trait::async_trait;
use lyra_core::error::ProviderError;
use lyra_core::message::ToolCall;
use lyra_core::provider::{ChatReply, ChatRequest, FragmentStream, InferenceBackend, ModelInfo, StreamFragment};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(ChatReply),
    Fragments(Vec<StreamFragment>),
    Fail(ProviderError),
}

/// A backend that answers queries from a script, in order.
///
/// Buffered and streamed queries share the script: a `Reply` streams as a
/// single fragment and `Fragments` are concatenated for `chat`. When the
/// script runs out, the `repeat` reply (if any) is returned forever.
pub struct SequentialMockBackend {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<ChatReply>,
    capabilities: Vec<String>,
    models: Vec<String>,
    requests: Mutex<Vec<ChatRequest>>,
    probes: Mutex<usize>,
}

impl SequentialMockBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            capabilities: vec!["completion".into()],
            models: Vec::new(),
            requests: Mutex::new(Vec::new()),
            probes: Mutex::new(0),
        }
    }

    /// A backend that gives the same reply to every query.
    pub fn always(reply: ChatReply) -> Self {
        let mut backend = Self::new(Vec::new());
        backend.repeat = Some(reply);
        backend
    }

    /// A single text reply.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Scripted::Reply(text_reply(text))])
    }

    /// Tool calls first, then a final answer.
    pub fn tool_then_answer(calls: Vec<ToolCall>, answer: &str) -> Self {
        Self::new(vec![
            Scripted::Reply(tool_reply("", calls)),
            Scripted::Reply(text_reply(answer)),
        ])
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn probe_count(&self) -> usize {
        *self.probes.lock().unwrap()
    }

    fn next(&self, request: ChatRequest) -> Result<Scripted, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(scripted), _) => Ok(scripted),
            (None, Some(reply)) => Ok(Scripted::Reply(reply.clone())),
            (None, None) => Err(ProviderError::MalformedResponse("script exhausted".into())),
        }
    }
}

#[async_trait]
impl InferenceBackend for SequentialMockBackend {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        match self.next(request)? {
            Scripted::Reply(reply) => Ok(reply),
            Scripted::Fragments(fragments) => {
                let mut reply = ChatReply::default();
                for fragment in fragments {
                    reply.content.push_str(&fragment.content);
                    reply.tool_calls.extend(fragment.tool_calls);
                }
                Ok(reply)
            }
            Scripted::Fail(e) => Err(e),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError> {
        let fragments = match self.next(request)? {
            Scripted::Reply(reply) => vec![StreamFragment {
                content: reply.content,
                thinking: reply.thinking,
                tool_calls: reply.tool_calls,
                done: true,
            }],
            Scripted::Fragments(fragments) => fragments,
            Scripted::Fail(e) => return Err(e),
        };

        let (tx, rx) = mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            let _ = tx.send(Ok(fragment)).await;
        }
        Ok(rx)
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(vec![text.len() as f32, 1.0])
    }

    async fn describe_model(&self, _model: &str) -> Result<ModelInfo, ProviderError> {
        *self.probes.lock().unwrap() += 1;
        Ok(ModelInfo {
            capabilities: self.capabilities.clone(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }
}

/// A reply with text only.
pub fn text_reply(text: &str) -> ChatReply {
    ChatReply {
        content: text.into(),
        model: "mock-model".into(),
        ..Default::default()
    }
}

/// A reply that requests tools.
pub fn tool_reply(content: &str, calls: Vec<ToolCall>) -> ChatReply {
    ChatReply {
        content: content.into(),
        tool_calls: calls,
        model: "mock-model".into(),
        ..Default::default()
    }
}

/// A tool call with id `call_<name>`.
pub fn tool_call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::new(format!("call_{name}"), name, arguments)
}
