//! The Lyra agent: one coherent answer per user turn.
//!
//! The turn loop follows a **query → inspect → dispatch** cycle:
//!
//! 1. **Receive** a user message (optionally augmented with retrieved context)
//! 2. **Probe** the model's capabilities to pick the system prompt and tools
//! 3. **Query** the inference backend with the session's history
//! 4. **If tool calls**: dispatch them, append results, loop back to step 3
//! 5. **If text**: strip control markers, append the answer, finish
//!
//! The loop continues until the model answers without tool calls or the
//! tool-round limit is reached. Replies can be buffered or streamed.

pub mod conversation;
pub mod dispatcher;
pub mod markers;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod speech;
pub mod stream_event;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use conversation::{ConversationState, DEFAULT_SESSION, SessionStore};
pub use dispatcher::{ToolDispatcher, ToolOutcome};
pub use markers::{FINAL_MARKER, FragmentScanner, MarkerEvent, strip_final_marker};
pub use orchestrator::{Orchestrator, OrchestratorSettings, TurnOutcome, TurnRequest};
pub use prompt::SystemPrompt;
pub use speech::{SpeechClient, SpeechError, cleanup_speech};
pub use stream_event::{ChunkMessage, TurnEvent};
