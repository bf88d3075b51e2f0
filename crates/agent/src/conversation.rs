//! Conversation state and per-session ownership.
//!
//! A [`ConversationState`] is an append-only message log whose first element
//! is always the system message. The [`SessionStore`] hands out one state per
//! session id, each behind an async mutex that a turn holds from start to
//! finish, so turns on the same session run one at a time. The store keeps a
//! bounded number of sessions and evicts idle ones past that.

use lyra_core::message::{Message, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Session used when the client does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// Ordered message log for one session.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    /// Start a conversation with its system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Add a message at the tail.
    ///
    /// System messages are never appended; the prompt at index 0 is updated
    /// with [`set_system_prompt`](Self::set_system_prompt) instead.
    pub fn append(&mut self, message: Message) {
        if message.role == Role::System {
            self.set_system_prompt(message.content);
            return;
        }
        self.messages.push(message);
    }

    /// Replace the content of the system message in place.
    pub fn set_system_prompt(&mut self, content: impl Into<String>) {
        let content = content.into();
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content = content,
            _ => self.messages.insert(0, Message::system(content)),
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.messages.first().map(|m| m.content.as_str()).unwrap_or_default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Sessions kept before idle ones are evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

struct SessionEntry {
    state: Arc<Mutex<ConversationState>>,
    /// Store-wide use counter at the last lookup
    last_used: u64,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<String, SessionEntry>,
    clock: u64,
}

/// Owns every session's conversation.
///
/// Client-chosen ids create sessions on demand, so the store is capped:
/// once `max_sessions` is reached, creating a session evicts the least
/// recently used one that no turn currently holds.
pub struct SessionStore {
    sessions: RwLock<Sessions>,
    initial_prompt: String,
    max_sessions: usize,
}

impl SessionStore {
    /// New sessions start with `initial_prompt` as their system message.
    pub fn new(initial_prompt: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            initial_prompt: initial_prompt.into(),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// Cap the number of sessions kept; at least one is always allowed.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Get a session, creating it on first use.
    pub async fn session(&self, id: &str) -> Arc<Mutex<ConversationState>> {
        let mut sessions = self.sessions.write().await;
        sessions.clock += 1;
        let now = sessions.clock;

        if let Some(entry) = sessions.entries.get_mut(id) {
            entry.last_used = now;
            return entry.state.clone();
        }

        if sessions.entries.len() >= self.max_sessions {
            evict_idle(&mut sessions.entries);
        }

        debug!(session_id = id, "Creating session");
        let state = Arc::new(Mutex::new(ConversationState::new(self.initial_prompt.clone())));
        sessions.entries.insert(
            id.to_string(),
            SessionEntry {
                state: state.clone(),
                last_used: now,
            },
        );
        state
    }

    /// A copy of a session's messages, if it exists.
    pub async fn snapshot(&self, id: &str) -> Option<Vec<Message>> {
        let session = self.sessions.read().await.entries.get(id).map(|e| e.state.clone())?;
        let state = session.lock().await;
        Some(state.messages().to_vec())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.entries.is_empty()
    }
}

/// Drop the least recently used session nobody else holds.
fn evict_idle(entries: &mut HashMap<String, SessionEntry>) {
    let victim = entries
        .iter()
        .filter(|(_, entry)| Arc::strong_count(&entry.state) == 1)
        .min_by_key(|(_, entry)| entry.last_used)
        .map(|(id, _)| id.clone());

    match victim {
        Some(id) => {
            debug!(session_id = %id, "Evicting idle session");
            entries.remove(&id);
        }
        None => warn!(sessions = entries.len(), "Session limit reached but every session is busy"),
    }
}
