//! Event Decoder
//!
//! Parses frame payloads into typed [`StreamEvent`]s. Payloads are untrusted:
//! anything unknown or malformed decodes to `None` and the frame is dropped,
//! so one corrupted frame cannot abort an otherwise healthy stream.

use serde::Deserialize;
use serde_json::Value;

use crate::messages::MessageRecord;

/// Reason used when an error frame carries no description
pub const UNKNOWN_ERROR_REASON: &str = "unknown error";

/// A decoded stream event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental assistant text
    Chunk {
        /// Text to append
        content: String,
    },
    /// Authoritative final assistant message
    Done {
        /// The finalized message
        message: MessageRecord,
    },
    /// Upstream failure; chunks already emitted remain valid
    Error {
        /// Opaque failure description
        reason: String,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream (`Done` or `Error`)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Chunk text, if this is a chunk
    #[must_use]
    pub fn as_chunk(&self) -> Option<&str> {
        match self {
            Self::Chunk { content } => Some(content),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Chunk {
        #[serde(default)]
        content: Option<String>,
    },
    Done {
        message: MessageRecord,
    },
    Error {
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        reason: Option<Value>,
        #[serde(default)]
        message: Option<Value>,
    },
}

/// Decode one frame payload
#[must_use]
pub fn decode(payload: &str) -> Option<StreamEvent> {
    let wire: WireEvent = match serde_json::from_str(payload.trim()) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, payload_len = payload.len(), "Dropping undecodable frame");
            return None;
        }
    };

    match wire {
        WireEvent::Chunk { content } => content
            .filter(|c| !c.is_empty())
            .map(|content| StreamEvent::Chunk { content }),
        WireEvent::Done { message } => Some(StreamEvent::Done { message }),
        WireEvent::Error {
            error,
            reason,
            message,
        } => {
            let reason = error
                .or(reason)
                .or(message)
                .map_or_else(|| UNKNOWN_ERROR_REASON.to_string(), describe);
            Some(StreamEvent::Error { reason })
        }
    }
}

/// Flatten an opaque error description to a reason string
fn describe(value: Value) -> String {
    match &value {
        Value::String(text) if !text.is_empty() => text.clone(),
        Value::Null | Value::String(_) => UNKNOWN_ERROR_REASON.to_string(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_string),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::messages::MessageRole;

    #[test]
    fn test_decode_chunk() {
        let event = decode(r#"{"type":"chunk","content":"2+"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Chunk {
                content: "2+".to_string()
            })
        );
        assert!(!event.unwrap().is_terminal());
    }

    #[test]
    fn test_empty_or_missing_chunk_content() {
        assert_eq!(decode(r#"{"type":"chunk","content":""}"#), None);
        assert_eq!(decode(r#"{"type":"chunk"}"#), None);
        assert_eq!(decode(r#"{"type":"chunk","content":null}"#), None);
    }

    #[test]
    fn test_decode_done_preserves_message() {
        let payload = r#"{
            "type": "done",
            "message": {
                "id": "3f1e2a4b-0000-4000-8000-000000000001",
                "role": "assistant",
                "content": "2+2=4",
                "created_at": "2024-05-01T10:00:00Z",
                "input_tokens": 12,
                "output_tokens": 5
            }
        }"#;

        let expected = MessageRecord {
            id: Some("3f1e2a4b-0000-4000-8000-000000000001".to_string()),
            role: MessageRole::Assistant,
            content: "2+2=4".to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
            input_tokens: Some(12),
            output_tokens: Some(5),
        };

        let event = decode(payload).unwrap();
        assert!(event.is_terminal());
        assert_eq!(event, StreamEvent::Done { message: expected });
    }

    #[test]
    fn test_done_without_message_is_dropped() {
        assert_eq!(decode(r#"{"type":"done"}"#), None);
        assert_eq!(decode(r#"{"type":"done","message":{"content":"x"}}"#), None);
    }

    #[test]
    fn test_decode_error_shapes() {
        let reason = |payload: &str| match decode(payload) {
            Some(StreamEvent::Error { reason }) => reason,
            other => panic!("expected error event, got {other:?}"),
        };

        assert_eq!(reason(r#"{"type":"error","error":"rate limited"}"#), "rate limited");
        assert_eq!(reason(r#"{"type":"error","reason":"overloaded"}"#), "overloaded");
        assert_eq!(
            reason(r#"{"type":"error","error":{"message":"bad key","code":401}}"#),
            "bad key"
        );
        assert_eq!(reason(r#"{"type":"error","error":{"code":500}}"#), r#"{"code":500}"#);
        assert_eq!(reason(r#"{"type":"error"}"#), UNKNOWN_ERROR_REASON);
        assert_eq!(reason(r#"{"type":"error","error":""}"#), UNKNOWN_ERROR_REASON);
    }

    #[test]
    fn test_malformed_payloads_dropped() {
        assert_eq!(decode("not json"), None);
        assert_eq!(decode("[DONE]"), None);
        assert_eq!(decode(r#"{"content":"no type"}"#), None);
        assert_eq!(decode(r#"{"type":"usage","tokens":3}"#), None);
        assert_eq!(decode(r#"{"type":"chunk","content":42}"#), None);
        assert_eq!(decode(""), None);
    }
}
