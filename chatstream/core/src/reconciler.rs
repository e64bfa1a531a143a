//! Message Reconciler
//!
//! Owns the ordered message log of every room and merges stream events into
//! it. All mutation goes through the operations below; callers never touch a
//! log directly.
//!
//! # Merge Rules
//!
//! ```text
//! begin_user_turn  ──▶ push Complete user message
//! apply_chunk      ──▶ append to the open assistant message, or open one
//! finalize(Done)   ──▶ open message takes the record's fields, Complete
//! finalize(Error)  ──▶ open message Interrupted(reason), content kept
//! ```
//!
//! A log holds at most one open message, always last. Finalizing twice with
//! the same event leaves the log as it was after the first call.

use std::collections::HashMap;

use thiserror::Error;

use crate::messages::{ChatMessage, MessageId, MessageRecord, MessageRole};
use crate::room::RoomId;

/// How a streamed turn ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finalize {
    /// Upstream delivered the authoritative message
    Done(MessageRecord),
    /// The turn failed with a reason
    Error(String),
}

/// Reconciler failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The room has an open message and cannot be reseeded
    #[error("room {0} is streaming")]
    RoomBusy(RoomId),
}

/// Message log of one room
#[derive(Clone, Debug, Default)]
pub struct RoomLog {
    messages: Vec<ChatMessage>,
    last_failure: Option<String>,
}

impl RoomLog {
    /// Messages in order
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Reason of the most recent failed turn, cleared by the next user turn
    #[must_use]
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// The open assistant message, if a turn is streaming
    #[must_use]
    pub fn open_message(&self) -> Option<&ChatMessage> {
        self.messages.last().filter(|m| m.is_open())
    }

    fn open_message_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.last_mut().filter(|m| m.is_open())
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        let last = self.messages.len() - 1;
        &self.messages[last]
    }
}

/// Message logs of all rooms
#[derive(Debug, Default)]
pub struct Reconciler {
    rooms: HashMap<RoomId, RoomLog>,
}

impl Reconciler {
    /// Create an empty reconciler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log of a room, if it has one
    #[must_use]
    pub fn room(&self, room: &RoomId) -> Option<&RoomLog> {
        self.rooms.get(room)
    }

    /// Messages of a room in order (empty for unknown rooms)
    #[must_use]
    pub fn messages(&self, room: &RoomId) -> &[ChatMessage] {
        self.rooms.get(room).map(RoomLog::messages).unwrap_or_default()
    }

    /// Reason of the room's most recent failed turn
    #[must_use]
    pub fn last_failure(&self, room: &RoomId) -> Option<&str> {
        self.rooms.get(room).and_then(RoomLog::last_failure)
    }

    /// The room's open assistant message
    #[must_use]
    pub fn open_message(&self, room: &RoomId) -> Option<&ChatMessage> {
        self.rooms.get(room).and_then(RoomLog::open_message)
    }

    /// Rooms with a log
    pub fn room_ids(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }

    /// Replace a room's log with stored history
    ///
    /// Returns the number of messages loaded.
    ///
    /// # Errors
    ///
    /// Returns `RoomBusy` if the room has an open message.
    pub fn seed(
        &mut self,
        room: &RoomId,
        records: impl IntoIterator<Item = MessageRecord>,
    ) -> Result<usize, ReconcileError> {
        let log = self.rooms.entry(room.clone()).or_default();
        if log.open_message().is_some() {
            return Err(ReconcileError::RoomBusy(room.clone()));
        }

        log.messages = records.into_iter().map(ChatMessage::from_record).collect();
        log.last_failure = None;
        tracing::debug!(room = %room, messages = log.messages.len(), "Seeded room history");
        Ok(log.messages.len())
    }

    /// Drop a room's log
    pub fn clear(&mut self, room: &RoomId) -> bool {
        self.rooms.remove(room).is_some()
    }

    /// Append the user's turn
    ///
    /// Returns the appended message.
    pub fn begin_user_turn(&mut self, room: &RoomId, text: impl Into<String>) -> &ChatMessage {
        let log = self.rooms.entry(room.clone()).or_default();

        // A turn left open by a lost stream can no longer grow
        if let Some(dangling) = log.open_message_mut() {
            tracing::warn!(room = %room, message = %dangling.id, "Closing dangling open message");
            dangling.interrupt("superseded by a new turn");
        }

        log.last_failure = None;
        log.push(ChatMessage::new(MessageRole::User, text))
    }

    /// Append chunk text to the room's open assistant message
    ///
    /// Opens a new assistant message if none is open.
    pub fn apply_chunk(&mut self, room: &RoomId, content: &str) -> MessageId {
        let log = self.rooms.entry(room.clone()).or_default();

        if let Some(open) = log.open_message_mut() {
            open.append(content);
            return open.id.clone();
        }

        let opened = log.push(ChatMessage::open_assistant(content));
        tracing::trace!(room = %room, message = %opened.id, "Opened assistant message");
        opened.id.clone()
    }

    /// Close the room's streamed turn
    ///
    /// Returns the message that now ends the log. Replaying a finalize that
    /// was already applied changes nothing.
    pub fn finalize(&mut self, room: &RoomId, outcome: Finalize) -> &ChatMessage {
        let log = self.rooms.entry(room.clone()).or_default();

        match outcome {
            Finalize::Done(mut record) => {
                if record.role != MessageRole::Assistant {
                    tracing::debug!(
                        room = %room,
                        role = ?record.role,
                        "Done message is not an assistant reply; keeping assistant role"
                    );
                    record.role = MessageRole::Assistant;
                }
                if let Some(open) = log.open_message_mut() {
                    open.apply_record(record);
                } else if log.messages.last().is_some_and(|m| m.matches_record(&record)) {
                    tracing::debug!(room = %room, "Ignoring replayed done event");
                } else {
                    log.push(ChatMessage::from_record(record));
                }
            }
            Finalize::Error(reason) => {
                if let Some(open) = log.open_message_mut() {
                    open.interrupt(reason.clone());
                } else if log.messages.last().is_some_and(|m| {
                    m.role == MessageRole::Assistant
                        && m.interruption_reason() == Some(reason.as_str())
                }) {
                    tracing::debug!(room = %room, reason = %reason, "Ignoring replayed error");
                } else {
                    log.push(ChatMessage::interrupted_assistant(reason.clone()));
                }
                log.last_failure = Some(reason);
            }
        }

        // The match above leaves at least one message in the log
        let last = log.messages.len() - 1;
        &log.messages[last]
    }
}
