//! Chat Messages
//!
//! Entries of a room's message log, their wire representation, and the
//! notifications the dispatcher emits to observers after each mutation.
//!
//! # Design Philosophy
//!
//! The core never renders anything. Surfaces subscribe to [`RoomUpdate`]s (or
//! poll the reconciler) and draw whatever state they are handed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::room::RoomId;

/// Local message identifier
///
/// Assigned by the reconciler; distinct from the id the upstream may attach
/// to a finalized message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
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

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// User input
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Lifecycle of a log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageStatus {
    /// Still receiving chunks
    Open,
    /// Closed normally
    Complete,
    /// Closed by a failure; content is whatever arrived before it
    Interrupted {
        /// Failure reason
        reason: String,
    },
}

/// A message as the upstream and the room store represent it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Upstream identifier (UUID string or integer, normalised to text)
    #[serde(
        default,
        deserialize_with = "deserialize_record_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Who sent it
    pub role: MessageRole,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Prompt tokens billed for the turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    /// Completion tokens billed for the turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

impl MessageRecord {
    /// Assistant record with only content set
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Set the upstream id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set token usage
    #[must_use]
    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self
    }
}

fn deserialize_record_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(text) => text,
        RawId::Number(n) => n.to_string(),
    }))
}

/// An entry of a room's message log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Local id
    pub id: MessageId,
    /// Upstream id, once the message has been finalized or seeded
    pub server_id: Option<String>,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Prompt tokens, when reported
    pub input_tokens: Option<u32>,
    /// Completion tokens, when reported
    pub output_tokens: Option<u32>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: MessageStatus,
}

impl ChatMessage {
    /// Create a closed message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            server_id: None,
            role,
            content: content.into(),
            input_tokens: None,
            output_tokens: None,
            created_at: Utc::now(),
            status: MessageStatus::Complete,
        }
    }

    /// Create an assistant message open for accumulation
    pub fn open_assistant(content: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Open,
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    /// Create an empty assistant message closed by a failure
    pub fn interrupted_assistant(reason: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Interrupted {
                reason: reason.into(),
            },
            ..Self::new(MessageRole::Assistant, String::new())
        }
    }

    /// Create a closed message from its wire form
    #[must_use]
    pub fn from_record(record: MessageRecord) -> Self {
        let mut msg = Self::new(record.role, String::new());
        msg.apply_record(record);
        msg
    }

    /// Whether the message still accepts chunks
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Open
    }

    /// Whether the message was closed by a failure
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self.status, MessageStatus::Interrupted { .. })
    }

    /// Failure reason, if interrupted
    #[must_use]
    pub fn interruption_reason(&self) -> Option<&str> {
        match &self.status {
            MessageStatus::Interrupted { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether this message is the closed result of `record`
    #[must_use]
    pub fn matches_record(&self, record: &MessageRecord) -> bool {
        if self.status != MessageStatus::Complete || self.role != record.role {
            return false;
        }
        match (&self.server_id, &record.id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            (None, None) => self.content == record.content,
            _ => false,
        }
    }

    /// Convert to wire form
    #[must_use]
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.server_id.clone(),
            role: self.role,
            content: self.content.clone(),
            created_at: Some(self.created_at),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    pub(crate) fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Replace every field but the local id and role with `record` and close
    /// the message
    pub(crate) fn apply_record(&mut self, record: MessageRecord) {
        self.server_id = record.id;
        self.content = record.content;
        self.input_tokens = record.input_tokens;
        self.output_tokens = record.output_tokens;
        if let Some(created_at) = record.created_at {
            self.created_at = created_at;
        }
        self.status = MessageStatus::Complete;
    }

    pub(crate) fn interrupt(&mut self, reason: impl Into<String>) {
        self.status = MessageStatus::Interrupted {
            reason: reason.into(),
        };
    }
}

/// Per-room streaming phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamPhase {
    /// No stream; ready for a new turn
    #[default]
    Idle,
    /// User turn recorded, connection being opened
    Sending,
    /// Connection open, frames arriving
    Streaming,
}

impl StreamPhase {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Sending => "Sending...",
            Self::Streaming => "Streaming...",
        }
    }
}

/// Notifications from the dispatcher to observers
///
/// Emitted in the order the corresponding mutations were applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomUpdate {
    /// The user's turn was appended optimistically
    UserMessage {
        /// Room the message belongs to
        room: RoomId,
        /// The appended message
        message: ChatMessage,
    },
    /// A chunk was appended to the open assistant message
    Token {
        /// Room being streamed
        room: RoomId,
        /// The open assistant message
        message_id: MessageId,
        /// The chunk text
        text: String,
    },
    /// The turn completed with the authoritative message
    StreamEnd {
        /// Room that finished
        room: RoomId,
        /// Final message as stored in the log
        message: ChatMessage,
    },
    /// The turn failed; partial content stays in the log
    StreamError {
        /// Room that failed
        room: RoomId,
        /// The interrupted assistant message
        message_id: MessageId,
        /// Failure reason
        reason: String,
    },
    /// The room moved to a new phase
    PhaseChanged {
        /// Room whose phase changed
        room: RoomId,
        /// The new phase
        phase: StreamPhase,
    },
}

impl RoomUpdate {
    /// Room the update refers to
    #[must_use]
    pub fn room(&self) -> &RoomId {
        match self {
            Self::UserMessage { room, .. }
            | Self::Token { room, .. }
            | Self::StreamEnd { room, .. }
            | Self::StreamError { room, .. }
            | Self::PhaseChanged { room, .. } => room,
        }
    }
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
    fn test_record_accepts_numeric_id() {
        let json = r#"{"id": 42, "role": "assistant", "content": "hi"}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id.as_deref(), Some("42"));
        assert_eq!(record.input_tokens, None);
    }

    #[test]
    fn test_record_null_tokens() {
        let json = r#"{"role": "user", "content": "hi", "input_tokens": null, "output_tokens": 3}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.role, MessageRole::User);
        assert_eq!(record.input_tokens, None);
        assert_eq!(record.output_tokens, Some(3));
    }

    #[test]
    fn test_apply_record_keeps_local_id() {
        let mut msg = ChatMessage::open_assistant("2+");
        let local_id = msg.id.clone();

        msg.apply_record(MessageRecord::assistant("2+2=4").with_id("srv-1").with_usage(5, 3));

        assert_eq!(msg.id, local_id);
        assert_eq!(msg.server_id.as_deref(), Some("srv-1"));
        assert_eq!(msg.content, "2+2=4");
        assert_eq!(msg.output_tokens, Some(3));
        assert!(!msg.is_open());
    }

    #[test]
    fn test_matches_record() {
        let msg = ChatMessage::from_record(MessageRecord::assistant("done").with_id("a"));
        assert!(msg.matches_record(&MessageRecord::assistant("other").with_id("a")));
        assert!(!msg.matches_record(&MessageRecord::assistant("done").with_id("b")));

        let anonymous = ChatMessage::from_record(MessageRecord::assistant("done"));
        assert!(anonymous.matches_record(&MessageRecord::assistant("done")));
        assert!(!anonymous.matches_record(&MessageRecord::assistant("different")));
    }

    #[test]
    fn test_interrupted_reason() {
        let mut msg = ChatMessage::open_assistant("Hel");
        assert_eq!(msg.interruption_reason(), None);
        msg.interrupt("cancelled");
        assert!(msg.is_interrupted());
        assert_eq!(msg.interruption_reason(), Some("cancelled"));
    }

    #[test]
    fn test_stream_phase_description() {
        assert_eq!(StreamPhase::default(), StreamPhase::Idle);
        assert_eq!(StreamPhase::Streaming.description(), "Streaming...");
    }
}
