//! The tool-calling orchestration loop.
//!
//! A turn runs `AwaitingModel → ToolRequested → AwaitingModel → Finalized`:
//!
//! 1. The user message (optionally augmented with retrieved context) is
//!    appended to the session's conversation.
//! 2. Before each query the model's capabilities decide whether tools are
//!    offered (and which system prompt variant is active) and whether
//!    extended reasoning is requested.
//! 3. A reply with tool calls is appended as a tool request, the dispatcher
//!    runs the calls, and the model is queried again with the full history.
//! 4. A reply without tool calls is the answer: the final-output marker is
//!    stripped, one `assistant` message is appended, and the turn ends.
//!
//! The number of tool rounds per turn is bounded. Reaching the bound is not
//! an error: the loop stops, keeps the best partial content, and reports a
//! diagnostic. Backend failures end the turn with an error but keep the
//! history appended so far.

use chrono::Utc;
use lyra_config::{AgentConfig, AppConfig};
use lyra_core::error::ProviderError;
use lyra_core::message::{Message, ToolCall};
use lyra_core::provider::{ChatReply, ChatRequest, FragmentStream, InferenceBackend};
use lyra_core::tool::{ToolDefinition, ToolRegistry};
use lyra_core::{DomainEvent, Error, EventBus};
use lyra_memory::Retriever;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conversation::{ConversationState, DEFAULT_SESSION, SessionStore};
use crate::dispatcher::ToolDispatcher;
use crate::markers::{FragmentScanner, MarkerEvent, Rendered, strip_final_marker};
use crate::prompt::SystemPrompt;
use crate::retrieval;
use crate::stream_event::TurnEvent;

/// Loop limits and timeouts.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum tool round-trips per turn
    pub max_depth: usize,
    /// Limit for one backend query (or for opening a stream)
    pub inference_timeout: Duration,
    /// Extra attempts for retryable backend failures
    pub inference_retries: u32,
    /// Delay before the first retry; doubles on each further attempt
    pub retry_backoff: Duration,
    /// Longest wait for the next stream fragment
    pub stream_idle_timeout: Duration,
    /// Models that always get `think: true`
    pub reasoning_models: Vec<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            inference_timeout: Duration::from_secs(config.inference_timeout_secs),
            inference_retries: config.inference_retries,
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
            reasoning_models: config.reasoning_models.clone(),
            ..Self::default()
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_depth: 10,
            inference_timeout: Duration::from_secs(300),
            inference_retries: 2,
            retry_backoff: Duration::from_millis(500),
            stream_idle_timeout: Duration::from_secs(120),
            reasoning_models: Vec::new(),
        }
    }
}

/// One user turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub model: String,
    pub content: String,
    pub use_rag: bool,
}

impl TurnRequest {
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: DEFAULT_SESSION.into(),
            model: model.into(),
            content: content.into(),
            use_rag: false,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_rag(mut self, use_rag: bool) -> Self {
        self.use_rag = use_rag;
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub session_id: String,
    pub model: String,
    /// The answer text, without the final marker
    pub content: String,
    /// Whether the model emitted the final-output marker
    pub final_marker: bool,
    /// Tool round-trips performed
    pub tool_rounds: usize,
    /// Whether tools were offered to the model
    pub tools_enabled: bool,
    /// Set when the loop stopped early
    pub diagnostic: Option<String>,
}

/// What to send with the next query.
struct QueryPlan {
    tools: Vec<ToolDefinition>,
    think: bool,
    tools_enabled: bool,
}

impl QueryPlan {
    fn request(&self, model: &str, state: &ConversationState, stream: bool) -> ChatRequest {
        ChatRequest::new(model, state.messages().to_vec())
            .with_tools(self.tools.clone())
            .with_stream(stream)
            .with_think(self.think)
    }
}

fn depth_diagnostic(rounds: usize) -> String {
    format!("Stopped after {rounds} tool rounds without a final answer.")
}

/// Drives turns against the inference backend.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn InferenceBackend>,
    dispatcher: ToolDispatcher,
    prompt: SystemPrompt,
    sessions: Arc<SessionStore>,
    settings: OrchestratorSettings,
    events: Arc<EventBus>,
    retriever: Option<Retriever>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn InferenceBackend>, tools: Arc<ToolRegistry>, prompt: SystemPrompt) -> Self {
        let sessions = Arc::new(SessionStore::new(prompt.persona_only()));
        Self {
            backend,
            dispatcher: ToolDispatcher::new(tools),
            prompt,
            sessions,
            settings: OrchestratorSettings::default(),
            events: Arc::new(EventBus::default()),
            retriever: None,
        }
    }

    /// Wire everything from configuration.
    pub fn from_config(
        backend: Arc<dyn InferenceBackend>,
        tools: Arc<ToolRegistry>,
        retriever: Retriever,
        config: &AppConfig,
    ) -> Self {
        Self::new(backend, tools, SystemPrompt::from_config(&config.agent))
            .with_settings(OrchestratorSettings::from_config(&config.agent))
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs))
            .with_max_sessions(config.agent.max_sessions)
            .with_retriever(retriever)
    }

    /// Replace the session store with one capped at `max_sessions`.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.sessions = Arc::new(SessionStore::new(self.prompt.persona_only()).with_max_sessions(max_sessions));
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.dispatcher = self.dispatcher.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Run a turn and return the whole answer at once.
    pub async fn run_turn(&self, request: TurnRequest, cancel: CancellationToken) -> lyra_core::Result<TurnOutcome> {
        let session = self.sessions.session(&request.session_id).await;
        let mut state = session.lock().await;
        self.turn_started(&request);

        let result = self.buffered_turn(&mut state, &request, &cancel).await;
        self.turn_finished(&request, &result);
        result
    }

    /// Run a turn on a background task, streaming [`TurnEvent`]s.
    ///
    /// The stream ends with `done` or `error`. Dropping the receiver cancels
    /// the turn.
    pub fn run_turn_stream(&self, request: TurnRequest, cancel: CancellationToken) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(128);
        let this = self.clone();

        tokio::spawn(async move {
            let session = this.sessions.session(&request.session_id).await;
            let mut state = session.lock().await;
            this.turn_started(&request);

            let mut sink = StreamSink::new(tx, cancel.clone());
            let result = this.streaming_turn(&mut state, &request, &cancel, &mut sink).await;
            this.turn_finished(&request, &result);

            match result {
                Ok(outcome) => {
                    if let Some(message) = outcome.diagnostic {
                        let _ = sink.send(TurnEvent::Diagnostic { message }).await;
                    }
                    let _ = sink
                        .send(TurnEvent::Done {
                            session_id: outcome.session_id,
                            tool_rounds: outcome.tool_rounds,
                            final_marker: outcome.final_marker,
                        })
                        .await;
                }
                Err(Error::Cancelled) => {}
                Err(e) => {
                    let _ = sink.send(TurnEvent::Error { message: e.to_string() }).await;
                }
            }
        });

        rx
    }

    async fn buffered_turn(
        &self,
        state: &mut ConversationState,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> lyra_core::Result<TurnOutcome> {
        self.append_user(state, request, cancel).await?;

        let mut rounds = 0;
        let mut partial = String::new();

        loop {
            let plan = self.plan(state, &request.model, cancel).await?;
            let chat = plan.request(&request.model, state, false);
            debug!(session_id = %request.session_id, messages = chat.messages.len(), rounds, "Querying model");

            let reply: ChatReply = self
                .with_retry(cancel, "chat", || self.backend.chat(chat.clone()))
                .await?;
            let (content, final_marker) = strip_final_marker(&reply.content);

            if reply.has_tool_calls() {
                if !content.is_empty() {
                    partial = content.clone();
                }
                if rounds >= self.settings.max_depth {
                    warn!(session_id = %request.session_id, rounds, "Tool round limit reached, stopping");
                    state.append(Message::assistant(partial.clone()));
                    return Ok(TurnOutcome {
                        session_id: request.session_id.clone(),
                        model: request.model.clone(),
                        content: partial,
                        final_marker: false,
                        tool_rounds: rounds,
                        tools_enabled: plan.tools_enabled,
                        diagnostic: Some(depth_diagnostic(rounds)),
                    });
                }
                if final_marker {
                    debug!("Reply carries the final marker but requests tools, running tools");
                }
                self.run_tools(state, content, reply.tool_calls, cancel, None).await?;
                rounds += 1;
                continue;
            }

            if plan.tools_enabled && !final_marker {
                info!(session_id = %request.session_id, "Answer finalized without the final marker");
            }
            state.append(Message::assistant(content.clone()));
            return Ok(TurnOutcome {
                session_id: request.session_id.clone(),
                model: request.model.clone(),
                content,
                final_marker,
                tool_rounds: rounds,
                tools_enabled: plan.tools_enabled,
                diagnostic: None,
            });
        }
    }

    async fn streaming_turn(
        &self,
        state: &mut ConversationState,
        request: &TurnRequest,
        cancel: &CancellationToken,
        sink: &mut StreamSink,
    ) -> lyra_core::Result<TurnOutcome> {
        self.append_user(state, request, cancel).await?;

        let mut rounds = 0;
        let mut tools_enabled;
        let mut diagnostic = None;

        loop {
            let plan = self.plan(state, &request.model, cancel).await?;
            tools_enabled = plan.tools_enabled;
            let chat = plan.request(&request.model, state, true);
            debug!(session_id = %request.session_id, messages = chat.messages.len(), rounds, "Streaming from model");

            let mut stream: FragmentStream = self
                .with_retry(cancel, "chat stream", || self.backend.chat_stream(chat.clone()))
                .await?;
            let mut scanner = FragmentScanner::new();
            let tool_request = self.consume(&mut stream, &mut scanner, sink, cancel).await?;
            // Stop reading; the backend request is aborted with the stream
            drop(stream);
            sink.forward(scanner.finish()).await?;

            let Some((content, calls)) = tool_request else {
                break;
            };
            let (content, _) = strip_final_marker(&content);

            if rounds >= self.settings.max_depth {
                warn!(session_id = %request.session_id, rounds, "Tool round limit reached, stopping");
                if !content.is_empty() {
                    sink.forward(vec![MarkerEvent::Text(content)]).await?;
                }
                diagnostic = Some(depth_diagnostic(rounds));
                break;
            }

            self.run_tools(state, content, calls, cancel, Some(&mut *sink)).await?;
            rounds += 1;
        }

        if tools_enabled && !sink.final_marker && diagnostic.is_none() {
            info!(session_id = %request.session_id, "Answer finalized without the final marker");
        }

        let content = sink.forwarded.clone();
        state.append(Message::assistant(content.clone()));
        Ok(TurnOutcome {
            session_id: request.session_id.clone(),
            model: request.model.clone(),
            content,
            final_marker: sink.final_marker && diagnostic.is_none(),
            tool_rounds: rounds,
            tools_enabled,
            diagnostic,
        })
    }

    /// Forward fragments until the stream ends or a fragment requests tools.
    async fn consume(
        &self,
        stream: &mut FragmentStream,
        scanner: &mut FragmentScanner,
        sink: &mut StreamSink,
        cancel: &CancellationToken,
    ) -> lyra_core::Result<Option<(String, Vec<ToolCall>)>> {
        let idle = self.settings.stream_idle_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = tokio::time::timeout(idle, stream.recv()) => next,
            };

            let mut fragment = match next {
                Err(_) => {
                    return Err(ProviderError::Timeout(format!(
                        "no stream fragment within {}s",
                        idle.as_secs()
                    ))
                    .into());
                }
                Ok(None) => return Ok(None),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(fragment))) => fragment,
            };

            if !fragment.tool_calls.is_empty() {
                let calls = std::mem::take(&mut fragment.tool_calls);
                let content = std::mem::take(&mut fragment.content);
                // Reasoning that rides along with the call is still shown
                sink.forward(scanner.push(&fragment)).await?;
                return Ok(Some((content, calls)));
            }

            let done = fragment.done;
            sink.forward(scanner.push(&fragment)).await?;
            if done {
                return Ok(None);
            }
        }
    }

    /// Append the tool request, dispatch it, and report to a stream if any.
    async fn run_tools(
        &self,
        state: &mut ConversationState,
        content: String,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
        mut sink: Option<&mut StreamSink>,
    ) -> lyra_core::Result<()> {
        info!(count = calls.len(), "Model requested tools");
        state.append(Message::tool_request(content, calls.clone()));

        if let Some(sink) = sink.as_deref_mut() {
            for call in &calls {
                sink.send(TurnEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name().to_string(),
                    arguments: serde_json::Value::Object(call.function.arguments.clone()),
                })
                .await?;
            }
        }

        let outcomes = self.dispatcher.resolve(state, &calls, cancel).await?;

        if let Some(sink) = sink {
            for outcome in &outcomes {
                sink.send(TurnEvent::ToolResult {
                    id: outcome.call_id().to_string(),
                    name: outcome.tool_name().to_string(),
                    output: outcome.text().to_string(),
                    success: outcome.success(),
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn append_user(
        &self,
        state: &mut ConversationState,
        request: &TurnRequest,
        cancel: &CancellationToken,
    ) -> lyra_core::Result<()> {
        let content = match (&self.retriever, request.use_rag) {
            (Some(retriever), true) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                prompt = retrieval::augment(retriever, &request.content) => prompt?,
            },
            (None, true) => {
                warn!("Retrieval requested but no vector store is configured");
                request.content.clone()
            }
            (_, false) => request.content.clone(),
        };
        state.append(Message::user(content));
        Ok(())
    }

    /// Probe the model and set the system prompt for the next query.
    async fn plan(
        &self,
        state: &mut ConversationState,
        model: &str,
        cancel: &CancellationToken,
    ) -> lyra_core::Result<QueryPlan> {
        let info = self
            .with_retry(cancel, "capability probe", || self.backend.describe_model(model))
            .await?;

        let registry = self.dispatcher.registry();
        let tools_enabled = info.supports_tools() && !registry.is_empty();
        state.set_system_prompt(self.prompt.variant(tools_enabled, &registry.names()));

        let think = info.supports_thinking() || self.settings.reasoning_models.iter().any(|m| m == model);
        debug!(model, tools_enabled, think, "Planned query");

        Ok(QueryPlan {
            tools: if tools_enabled { registry.definitions() } else { Vec::new() },
            think,
            tools_enabled,
        })
    }

    /// Run a backend operation with a timeout and bounded retries.
    async fn with_retry<T, F, Fut>(&self, cancel: &CancellationToken, what: &str, mut op: F) -> lyra_core::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let limit = self.settings.inference_timeout;
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = tokio::time::timeout(limit, op()) => result.unwrap_or_else(|_| {
                    Err(ProviderError::Timeout(format!("{what} took longer than {}s", limit.as_secs())))
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.settings.inference_retries => {
                    attempt += 1;
                    let delay = self.settings.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(what, attempt, error = %e, "Backend call failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn turn_started(&self, request: &TurnRequest) {
        info!(session_id = %request.session_id, model = %request.model, rag = request.use_rag, "Turn started");
        self.events.publish(DomainEvent::TurnStarted {
            session_id: request.session_id.clone(),
            model: request.model.clone(),
            timestamp: Utc::now(),
        });
    }

    fn turn_finished(&self, request: &TurnRequest, result: &lyra_core::Result<TurnOutcome>) {
        match result {
            Ok(outcome) => {
                info!(
                    session_id = %outcome.session_id,
                    tool_rounds = outcome.tool_rounds,
                    final_marker = outcome.final_marker,
                    "Answer generated"
                );
                self.events.publish(DomainEvent::ResponseGenerated {
                    session_id: outcome.session_id.clone(),
                    model: outcome.model.clone(),
                    tool_rounds: outcome.tool_rounds,
                    final_marker: outcome.final_marker,
                    timestamp: Utc::now(),
                });
            }
            Err(Error::Cancelled) => {
                info!(session_id = %request.session_id, "Turn cancelled");
            }
            Err(e) => {
                error!(session_id = %request.session_id, error = %e, "Turn failed");
                self.events.publish(DomainEvent::ErrorOccurred {
                    context: format!("turn:{}", request.session_id),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

/// The client side of a streaming turn.
struct StreamSink {
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
    /// Every visible text forwarded this turn
    forwarded: String,
    final_marker: bool,
}

impl StreamSink {
    fn new(tx: mpsc::Sender<TurnEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            forwarded: String::new(),
            final_marker: false,
        }
    }

    /// Send an event; a vanished client cancels the turn.
    async fn send(&mut self, event: TurnEvent) -> lyra_core::Result<()> {
        if self.tx.send(event).await.is_err() {
            debug!("Stream client went away, cancelling turn");
            self.cancel.cancel();
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Forward one fragment's marker events as a single chunk.
    async fn forward(&mut self, events: Vec<MarkerEvent>) -> lyra_core::Result<()> {
        let rendered = Rendered::from_events(&events);
        self.final_marker |= rendered.final_marker;
        if rendered.is_empty() {
            return Ok(());
        }
        self.forwarded.push_str(&rendered.content);
        self.send(TurnEvent::chunk(rendered.content, rendered.thinking)).await
    }
}
