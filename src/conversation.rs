use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "VitalHealth",
        }
    }
}

/// Individual transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Transcript and backend conversation identifier for one UI session.
///
/// The identifier is only ever taken from the backend: once a non-empty value
/// has been observed it stays fixed until [`ConversationState::reset`].
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    transcript: Vec<Message>,
    conversation_id: String,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh session whose transcript opens with a welcome message
    pub fn with_greeting(greeting: Option<&str>) -> Self {
        let mut state = Self::new();
        if let Some(greeting) = greeting.filter(|g| !g.trim().is_empty()) {
            state.append(Message::assistant(greeting));
        }
        state
    }

    /// Continue a conversation whose identifier was issued by the backend in
    /// an earlier run.
    pub fn resume(conversation_id: impl Into<String>) -> Self {
        Self {
            transcript: Vec::new(),
            conversation_id: conversation_id.into(),
        }
    }

    pub fn append(&mut self, message: Message) {
        self.transcript.push(message);
    }

    /// Start a new conversation: transcript and identifier go together.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.conversation_id.clear();
    }

    /// Record the backend's conversation identifier if none is held yet.
    ///
    /// Returns `true` when this call captured the identifier.
    pub fn observe_conversation_id(&mut self, candidate: Option<&str>) -> bool {
        if !self.conversation_id.is_empty() {
            return false;
        }
        match candidate {
            Some(id) if !id.is_empty() => {
                self.conversation_id = id.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }
}
