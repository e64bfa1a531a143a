//! Transport Traits
//!
//! The seam between the dispatcher and the network. The dispatcher only needs
//! "open a completion stream and hand me its bytes", so tests drive it with a
//! scripted transport and production uses [`HttpTransport`](super::HttpTransport).

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::room::RoomId;

/// Raw response fragments in arrival order
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Outbound completion request
///
/// Provider and model select the endpoint; the remaining fields form the
/// JSON body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    /// Provider identifier (endpoint-selecting, case-insensitive)
    #[serde(skip)]
    pub provider: String,
    /// Model identifier (endpoint-selecting, case-insensitive)
    #[serde(skip)]
    pub model: String,
    /// Room system prompt
    pub system_prompt: String,
    /// The new user turn
    pub message: String,
    /// Room the turn belongs to
    pub chatroom_id: RoomId,
}

impl CompletionRequest {
    /// Path segments selecting the completion endpoint, normalised to lowercase
    #[must_use]
    pub fn endpoint_segments(&self) -> [String; 5] {
        [
            "providers".to_string(),
            self.provider.to_lowercase(),
            "models".to_string(),
            self.model.to_lowercase(),
            "completions".to_string(),
        ]
    }
}

/// Transport failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The configured endpoint cannot address a request
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if readable
        body: String,
    },

    /// The open stream failed mid-read
    #[error("stream read failed: {0}")]
    Read(String),

    /// No fragment arrived within the idle timeout
    #[error("no data received for {}ms", .0.as_millis())]
    IdleTimeout(Duration),

    /// A non-streaming response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Opens completion streams
///
/// Implement this trait to route completions through another client.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Open a completion stream for `request`
    ///
    /// Resolves once the upstream has accepted the request; the returned
    /// stream yields response fragments until the connection ends. Dropping
    /// the stream closes the connection.
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream, TransportError>;
}
