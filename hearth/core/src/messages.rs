//! Session Messages
//!
//! Identifiers, committed records, and the events the session controller sends
//! to whatever view layer is attached (terminal, desktop window, test harness).
//!
//! # Design Philosophy
//!
//! The controller owns all streaming state. Views are pure renderers: they
//! receive `ViewEvent`s and draw them, and never reach back into the pipeline
//! except through the explicit controller operations (`start`, `cancel`,
//! `accept_summarization`).

use serde::{Deserialize, Serialize};

use crate::streaming::RenderUpdate;

/// Stream session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("stream_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Model output
    Assistant,
    /// System instruction or notice
    System,
}

/// A committed conversation record
///
/// This is the only shape the persistence collaborator ever receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Unique message ID
    pub id: MessageId,
    /// Who produced the content
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the record was committed (Unix timestamp ms)
    pub timestamp_ms: i64,
    /// Model that generated the content (assistant records)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token estimate for the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

impl ChatRecord {
    /// Create a record stamped with the current time
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            model: None,
            token_count: None,
        }
    }

    /// Convenience constructor for user input
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Attach the generating model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach a token estimate
    #[must_use]
    pub fn with_token_count(mut self, count: u32) -> Self {
        self.token_count = Some(count);
        self
    }
}

/// Lifecycle state of a stream session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Created, transport not yet opened
    Idle,
    /// Transport open, frames arriving
    Streaming,
    /// Server signaled completion (or the stream ended naturally)
    Completed,
    /// Transport or upstream failure
    Errored,
    /// Explicitly aborted by the caller
    Cancelled,
}

impl StreamState {
    /// Whether no further transition can occur
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
}

/// Events from the session controller to the view layer
#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    /// A new stream session opened for an outgoing message
    SessionStarted {
        /// The new session
        session_id: SessionId,
        /// Model answering the message
        model: String,
    },

    /// Coalesced text for the view to paint
    Render {
        /// Session the text belongs to
        session_id: SessionId,
        /// What to paint
        update: RenderUpdate,
    },

    /// Session state transition
    StateChanged {
        /// Session that transitioned
        session_id: SessionId,
        /// The new state
        state: StreamState,
    },

    /// User-visible notice (failures; never sent for cancellation)
    Notice {
        /// Severity
        level: NotifyLevel,
        /// Text to show
        message: String,
    },

    /// The conversation is close to the model's context window.
    ///
    /// The view should offer summarization; accepting calls
    /// `SessionController::accept_summarization`.
    BudgetNearLimit {
        /// Current token estimate
        estimated_tokens: u32,
        /// Context window size
        limit: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_unique() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
        assert!(id1.0.starts_with("stream_"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!StreamState::Idle.is_terminal());
        assert!(!StreamState::Streaming.is_terminal());
        assert!(StreamState::Completed.is_terminal());
        assert!(StreamState::Errored.is_terminal());
        assert!(StreamState::Cancelled.is_terminal());
    }

    #[test]
    fn test_record_serialization_skips_empty_optionals() {
        let record = ChatRecord::user("hi");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("model").is_none());
        assert!(json.get("token_count").is_none());

        let record = ChatRecord::new(MessageRole::Assistant, "ok")
            .with_model("llama3.2")
            .with_token_count(1);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["token_count"], 1);
    }
}
