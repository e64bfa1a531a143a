//! Chatstream Core - Streaming Completion Engine for Chat Rooms
//!
//! This crate turns a completions API's server-sent event stream into an
//! ordered, per-room message log. It renders nothing: surfaces subscribe to
//! [`RoomUpdate`]s or read the log and draw it however they like.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Surfaces (CLI, UI)                        │
//! │            send(room, text)  ▲ RoomUpdate / messages()            │
//! └──────────────────┬───────────┴───────────────────────────────────┘
//!                    │
//! ┌──────────────────┴───────────────────────────────────────────────┐
//! │                         Dispatcher                                │
//! │   one StreamSession per room, single-flight, cancellation         │
//! │                                                                   │
//! │   CompletionTransport ──▶ FrameReader ──▶ decode ──▶ Reconciler   │
//! │   (bytes)                 (frames)        (events)   (room logs)  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: Runs streams, one per room
//! - [`Reconciler`]: Owns every room's message log
//! - [`ChatMessage`]: One entry of a log
//! - [`StreamEvent`]: A decoded frame (chunk, done or error)
//! - [`HttpTransport`]: The reqwest-backed [`CompletionTransport`]
//!
//! # Quick Start
//!
//! ```ignore
//! use chatstream_core::{load_config, Dispatcher, DispatcherConfig, HttpTransport, Room};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(None)?;
//!     let (tx, mut rx) = mpsc::channel(config.update_channel_capacity);
//!
//!     let dispatcher = Dispatcher::new(HttpTransport::new(&config)?, DispatcherConfig::from(&config))
//!         .with_updates(tx);
//!
//!     tokio::spawn(async move {
//!         while let Some(update) = rx.recv().await {
//!             println!("{update:?}");
//!         }
//!     });
//!
//!     let room = Room::new("room-1", "OpenAI", "gpt-4o");
//!     let outcome = dispatcher.send(&room, "What is 2+2?").await?;
//!     println!("{}", outcome.message.content);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: Client configuration (defaults, env, TOML file)
//! - [`dispatcher`]: Per-room stream sessions
//! - [`messages`]: Log entries, wire records and observer notifications
//! - [`reconciler`]: Merge rules for room logs
//! - [`room`]: Room descriptions
//! - [`stream`]: Frame reader and event decoder
//! - [`transport`]: Connection abstraction and the HTTP client

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod messages;
pub mod reconciler;
pub mod room;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use config::{load_config, ClientConfig, ConfigError, FrameConfig};
pub use dispatcher::{
    Dispatcher, DispatcherConfig, SendError, SendOutcome, SessionInfo, CANCELLED_REASON,
    UNEXPECTED_END_REASON,
};
pub use messages::{
    ChatMessage, MessageId, MessageRecord, MessageRole, MessageStatus, RoomUpdate, StreamPhase,
};
pub use reconciler::{Finalize, ReconcileError, Reconciler};
pub use room::{Room, RoomId};
pub use stream::{decode, frames, FrameReader, StreamEvent};
pub use transport::{
    ByteStream, CompletionRequest, CompletionTransport, HttpTransport, TransportError,
};
