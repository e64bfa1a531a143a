//! Chat Rooms
//!
//! A room identifies one conversation. Rooms are created, renamed and deleted
//! by the surrounding application; the core only reads them to build the
//! outbound completion request.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::CompletionRequest;

/// Room identifier
///
/// Opaque to the core. The upstream uses it to persist and echo back context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Wrap an identifier handed out by the room store
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A conversation as stored by the room collaborator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier
    pub id: RoomId,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Provider identifier (e.g. "OpenAI", "Anthropic"), compared case-insensitively
    pub provider: String,
    /// Model identifier within the provider
    pub model_id: String,
    /// System prompt sent with every turn
    #[serde(default)]
    pub system_prompt: String,
    /// When the room was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the room was last updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Room {
    /// Create a room with the fields the core needs
    pub fn new(
        id: impl Into<RoomId>,
        provider: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            provider: provider.into(),
            model_id: model_id.into(),
            system_prompt: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Whether this room talks to the given provider
    #[must_use]
    pub fn uses_provider(&self, provider: &str) -> bool {
        self.provider.eq_ignore_ascii_case(provider)
    }

    /// Build the outbound request for a new user turn
    #[must_use]
    pub fn completion_request(&self, message: impl Into<String>) -> CompletionRequest {
        CompletionRequest {
            provider: self.provider.clone(),
            model: self.model_id.clone(),
            system_prompt: self.system_prompt.clone(),
            message: message.into(),
            chatroom_id: self.id.clone(),
        }
    }
}
