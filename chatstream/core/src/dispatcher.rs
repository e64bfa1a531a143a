//! Stream Dispatcher
//!
//! Runs one completion stream per room: claims the room, records the user
//! turn, opens the connection, drives frames through the decoder into the
//! reconciler, and reports how the turn ended.
//!
//! # Phases
//!
//! ```text
//! Idle ──send──▶ Sending ──open──▶ Streaming ──done / error / cancel──▶ Idle
//!   ▲                │
//!   └── open failed ─┘
//! ```
//!
//! A room has at most one session. A second `send` on a busy room fails with
//! [`SendError::AlreadyStreaming`] before anything touches the network or the
//! message log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::{ClientConfig, FrameConfig};
use crate::messages::{ChatMessage, MessageId, MessageRecord, RoomUpdate, StreamPhase};
use crate::reconciler::{Finalize, ReconcileError, Reconciler};
use crate::room::{Room, RoomId};
use crate::stream::{decode, frames, StreamEvent};
use crate::transport::{ByteStream, CompletionTransport, TransportError};

/// Reason recorded when a stream is cancelled
pub const CANCELLED_REASON: &str = "cancelled";
/// Reason recorded when the connection closes before a terminal event
pub const UNEXPECTED_END_REASON: &str = "stream ended unexpectedly";
/// Reason reported when a room already has a stream
pub const ALREADY_STREAMING_REASON: &str = "already streaming";

// ============================================================================
// Configuration
// ============================================================================

/// Dispatcher settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Inbound framing
    pub frame: FrameConfig,
    /// Maximum silence between fragments; `None` waits forever
    pub idle_timeout: Option<Duration>,
}

impl From<&ClientConfig> for DispatcherConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            frame: config.frame.clone(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why a send failed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    /// The room already has a stream; nothing was sent
    #[error("room {room} is already streaming")]
    AlreadyStreaming {
        /// The busy room
        room: RoomId,
    },

    /// Upstream reported a failure in an error event
    #[error("upstream error: {reason}")]
    Protocol {
        /// Opaque upstream description
        reason: String,
    },

    /// The connection failed or ended early
    #[error("transport error: {reason}")]
    Transport {
        /// Failure description
        reason: String,
    },

    /// The stream was cancelled
    #[error("stream cancelled")]
    Cancelled,
}

impl SendError {
    /// Reason string recorded for this failure
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::AlreadyStreaming { .. } => ALREADY_STREAMING_REASON,
            Self::Protocol { reason } | Self::Transport { reason } => reason,
            Self::Cancelled => CANCELLED_REASON,
        }
    }
}

impl From<TransportError> for SendError {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }
}

/// A completed turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendOutcome {
    /// Room the turn ran in
    pub room: RoomId,
    /// Local id of the user's message
    pub user_message_id: MessageId,
    /// The finalized assistant message
    pub message: ChatMessage,
    /// Chunks received before the final message
    pub chunks: usize,
    /// Wall time from send to finalize
    pub elapsed: Duration,
}

// ============================================================================
// Sessions
// ============================================================================

/// Run state of a room's in-flight stream
#[derive(Debug)]
pub struct StreamSession {
    room: RoomId,
    phase: StreamPhase,
    cancel: Option<oneshot::Sender<()>>,
    buffer: String,
    chunks: usize,
    started: Instant,
}

impl StreamSession {
    fn new(room: RoomId, cancel: oneshot::Sender<()>) -> Self {
        Self {
            room,
            phase: StreamPhase::Sending,
            cancel: Some(cancel),
            buffer: String::new(),
            chunks: 0,
            started: Instant::now(),
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            room: self.room.clone(),
            phase: self.phase,
            chunks: self.chunks,
            buffered_bytes: self.buffer.len(),
            elapsed: self.started.elapsed(),
            cancel_requested: self.cancel.is_none(),
        }
    }
}

/// Snapshot of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Room being streamed
    pub room: RoomId,
    /// Current phase
    pub phase: StreamPhase,
    /// Chunks applied so far
    pub chunks: usize,
    /// Bytes of chunk text received so far
    pub buffered_bytes: usize,
    /// Time since the send started
    pub elapsed: Duration,
    /// Whether cancellation was requested
    pub cancel_requested: bool,
}

/// Clears a session however `send` exits
///
/// If the send future is dropped mid-flight the turn is finalized as
/// cancelled here, exactly once.
struct SessionGuard<'a, T: CompletionTransport> {
    dispatcher: &'a Dispatcher<T>,
    room: RoomId,
    finalized: bool,
    released: bool,
}

impl<T: CompletionTransport> Drop for SessionGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finalized {
            let message_id = self
                .dispatcher
                .reconciler
                .lock()
                .finalize(&self.room, Finalize::Error(CANCELLED_REASON.to_string()))
                .id
                .clone();
            tracing::info!(room = %self.room, "Send dropped mid-stream; finalized as cancelled");
            self.dispatcher.notify(RoomUpdate::StreamError {
                room: self.room.clone(),
                message_id,
                reason: CANCELLED_REASON.to_string(),
            });
        }
        if !self.released {
            self.dispatcher.sessions.remove(&self.room);
            self.dispatcher.notify(RoomUpdate::PhaseChanged {
                room: self.room.clone(),
                phase: StreamPhase::Idle,
            });
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs completion streams for any number of rooms
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct Dispatcher<T: CompletionTransport> {
    transport: T,
    config: DispatcherConfig,
    reconciler: Arc<Mutex<Reconciler>>,
    sessions: DashMap<RoomId, StreamSession>,
    updates: Option<mpsc::Sender<RoomUpdate>>,
}

impl<T: CompletionTransport> Dispatcher<T> {
    /// Create a dispatcher with its own empty reconciler
    pub fn new(transport: T, config: DispatcherConfig) -> Self {
        Self {
            transport,
            config,
            reconciler: Arc::new(Mutex::new(Reconciler::new())),
            sessions: DashMap::new(),
            updates: None,
        }
    }

    /// Send notifications to `tx`
    #[must_use]
    pub fn with_updates(mut self, tx: mpsc::Sender<RoomUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Use a shared reconciler
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Arc<Mutex<Reconciler>>) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The shared reconciler
    ///
    /// Do not hold its lock across an await.
    pub fn reconciler(&self) -> &Arc<Mutex<Reconciler>> {
        &self.reconciler
    }

    /// Snapshot of a room's log
    pub fn messages(&self, room: &RoomId) -> Vec<ChatMessage> {
        self.reconciler.lock().messages(room).to_vec()
    }

    /// Reason of the room's most recent failed turn
    pub fn last_failure(&self, room: &RoomId) -> Option<String> {
        self.reconciler.lock().last_failure(room).map(str::to_string)
    }

    /// Load stored history into an idle room
    ///
    /// # Errors
    ///
    /// Returns `RoomBusy` while the room has a session.
    pub fn seed(
        &self,
        room: &RoomId,
        records: impl IntoIterator<Item = MessageRecord>,
    ) -> Result<usize, ReconcileError> {
        // `send` claims the room before it takes this lock, so checking under
        // the lock cannot miss a turn that is about to be recorded
        let mut reconciler = self.reconciler.lock();
        if self.sessions.contains_key(room) {
            return Err(ReconcileError::RoomBusy(room.clone()));
        }
        reconciler.seed(room, records)
    }

    /// Current phase of a room
    pub fn phase(&self, room: &RoomId) -> StreamPhase {
        self.sessions
            .get(room)
            .map(|session| session.phase)
            .unwrap_or_default()
    }

    /// Whether a room has a session
    pub fn is_streaming(&self, room: &RoomId) -> bool {
        self.sessions.contains_key(room)
    }

    /// Number of rooms with a session
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of a room's session
    pub fn session_info(&self, room: &RoomId) -> Option<SessionInfo> {
        self.sessions.get(room).map(|session| session.info())
    }

    /// Request cancellation of a room's stream
    ///
    /// Returns `false` if the room has no session or was already cancelled.
    /// The pending `send` resolves with [`SendError::Cancelled`].
    pub fn cancel(&self, room: &RoomId) -> bool {
        let Some(cancel) = self
            .sessions
            .get_mut(room)
            .and_then(|mut session| session.cancel.take())
        else {
            return false;
        };
        tracing::debug!(room = %room, "Cancellation requested");
        cancel.send(()).is_ok()
    }

    /// Send a user turn and stream the reply into the room's log
    ///
    /// Resolves when the stream reaches a terminal event, fails or is
    /// cancelled. Whatever the outcome, the room is idle afterwards and the
    /// log ends with a closed assistant message (except for
    /// `AlreadyStreaming`, which changes nothing).
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub async fn send(
        &self,
        room: &Room,
        text: impl Into<String>,
    ) -> Result<SendOutcome, SendError> {
        let text = text.into();
        let room_id = room.id.clone();

        let mut cancel_rx = match self.sessions.entry(room_id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(room = %room_id, "Rejected send: room already streaming");
                return Err(SendError::AlreadyStreaming { room: room_id });
            }
            Entry::Vacant(vacant) => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                vacant.insert(StreamSession::new(room_id.clone(), cancel_tx));
                cancel_rx
            }
        };

        let user_message = self
            .reconciler
            .lock()
            .begin_user_turn(&room_id, text.clone())
            .clone();
        let user_message_id = user_message.id.clone();
        let mut guard = SessionGuard {
            dispatcher: self,
            room: room_id.clone(),
            finalized: false,
            released: false,
        };

        tracing::info!(
            room = %room_id,
            transport = self.transport.name(),
            "Sending user turn"
        );
        let result = self.run(room, user_message, text, &mut cancel_rx).await;
        let cancelled = matches!(result, Err(SendError::Cancelled));

        let (finalize, result) = match result {
            Ok(record) => (Finalize::Done(record), Ok(())),
            Err(err) => (Finalize::Error(err.reason().to_string()), Err(err)),
        };
        let message = self
            .reconciler
            .lock()
            .finalize(&room_id, finalize)
            .clone();
        guard.finalized = true;

        let (chunks, elapsed) = self
            .sessions
            .remove(&room_id)
            .map(|(_, session)| (session.chunks, session.started.elapsed()))
            .unwrap_or_default();
        guard.released = true;

        let result = match result {
            Ok(()) => {
                tracing::info!(
                    room = %room_id,
                    chunks,
                    elapsed_ms = millis(elapsed),
                    "Stream completed"
                );
                self.emit(RoomUpdate::StreamEnd {
                    room: room_id.clone(),
                    message: message.clone(),
                })
                .await;
                Ok(SendOutcome {
                    room: room_id.clone(),
                    user_message_id,
                    message,
                    chunks,
                    elapsed,
                })
            }
            Err(err) => {
                tracing::warn!(
                    room = %room_id,
                    reason = %err.reason(),
                    chunks,
                    elapsed_ms = millis(elapsed),
                    "Stream failed"
                );
                let update = RoomUpdate::StreamError {
                    room: room_id.clone(),
                    message_id: message.id.clone(),
                    reason: err.reason().to_string(),
                };
                // A cancelled turn must not wait on a stalled observer
                if cancelled {
                    self.notify(update);
                } else {
                    self.emit(update).await;
                }
                Err(err)
            }
        };

        let idle = RoomUpdate::PhaseChanged {
            room: room_id,
            phase: StreamPhase::Idle,
        };
        if cancelled {
            self.notify(idle);
        } else {
            self.emit(idle).await;
        }
        result
    }

    /// Open the connection and apply events until a terminal one
    ///
    /// Every await point, including delivery of updates, yields to `cancel_rx`.
    async fn run(
        &self,
        room: &Room,
        user_message: ChatMessage,
        text: String,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> Result<MessageRecord, SendError> {
        self.emit_live(
            RoomUpdate::PhaseChanged {
                room: room.id.clone(),
                phase: StreamPhase::Sending,
            },
            cancel_rx,
        )
        .await?;
        self.emit_live(
            RoomUpdate::UserMessage {
                room: room.id.clone(),
                message: user_message,
            },
            cancel_rx,
        )
        .await?;

        let request = room.completion_request(text);

        let opened = tokio::select! {
            biased;
            _ = &mut *cancel_rx => None,
            opened = self.transport.open(&request) => Some(opened),
        };
        let bytes = opened.ok_or(SendError::Cancelled)??;

        self.set_phase(&room.id, StreamPhase::Streaming);
        self.emit_live(
            RoomUpdate::PhaseChanged {
                room: room.id.clone(),
                phase: StreamPhase::Streaming,
            },
            cancel_rx,
        )
        .await?;

        let mut frames: BoxStream<'static, Result<String, TransportError>> =
            frames(with_idle_timeout(bytes, self.config.idle_timeout), self.config.frame.clone())
                .boxed();

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut *cancel_rx => None,
                next = frames.next() => Some(next),
            };
            let Some(next) = next else {
                return Err(SendError::Cancelled);
            };

            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(SendError::Transport {
                        reason: UNEXPECTED_END_REASON.to_string(),
                    })
                }
            };

            match decode(&payload) {
                None => {}
                Some(StreamEvent::Chunk { content }) => {
                    self.apply_chunk(&room.id, content, cancel_rx).await?;
                }
                Some(StreamEvent::Done { message }) => return Ok(message),
                Some(StreamEvent::Error { reason }) => return Err(SendError::Protocol { reason }),
            }
        }
    }

    async fn apply_chunk(
        &self,
        room: &RoomId,
        content: String,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> Result<(), SendError> {
        let message_id = self.reconciler.lock().apply_chunk(room, &content);
        if let Some(mut session) = self.sessions.get_mut(room) {
            session.buffer.push_str(&content);
            session.chunks += 1;
        }
        self.emit_live(
            RoomUpdate::Token {
                room: room.clone(),
                message_id,
                text: content,
            },
            cancel_rx,
        )
        .await
    }

    fn set_phase(&self, room: &RoomId, phase: StreamPhase) {
        if let Some(mut session) = self.sessions.get_mut(room) {
            session.phase = phase;
        }
    }

    async fn emit(&self, update: RoomUpdate) {
        if let Some(tx) = &self.updates {
            if tx.send(update).await.is_err() {
                tracing::trace!("Update receiver dropped");
            }
        }
    }

    /// Like `emit`, but gives up with `Cancelled` if the session is cancelled
    /// while the channel is full
    async fn emit_live(
        &self,
        update: RoomUpdate,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> Result<(), SendError> {
        let Some(tx) = &self.updates else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = &mut *cancel_rx => Err(SendError::Cancelled),
            sent = tx.send(update) => {
                if sent.is_err() {
                    tracing::trace!("Update receiver dropped");
                }
                Ok(())
            }
        }
    }

    fn notify(&self, update: RoomUpdate) {
        if let Some(tx) = &self.updates {
            if let Err(e) = tx.try_send(update) {
                tracing::debug!(error = %e, "Dropped room update");
            }
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Fail the stream if no fragment arrives within `limit`
fn with_idle_timeout(bytes: ByteStream, limit: Option<Duration>) -> ByteStream {
    let Some(limit) = limit else {
        return bytes;
    };
    futures::stream::unfold(Some(bytes), move |state| async move {
        let mut bytes = state?;
        match tokio::time::timeout(limit, bytes.next()).await {
            Ok(Some(fragment)) => Some((fragment, Some(bytes))),
            Ok(None) => None,
            Err(_) => Some((Err(TransportError::IdleTimeout(limit)), None)),
        }
    })
    .boxed()
}
