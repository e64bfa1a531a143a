//! Inbound Stream Pipeline
//!
//! The two stateless stages between an open connection and the reconciler:
//!
//! ```text
//! bytes ──▶ FrameReader ──▶ frame payload ──▶ decode() ──▶ StreamEvent
//!           (buffers partial                   (drops malformed
//!            frames)                             frames)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chatstream_core::stream::{decode, frames};
//! use chatstream_core::config::FrameConfig;
//! use futures::StreamExt;
//!
//! let mut frames = frames(byte_stream, FrameConfig::default()).boxed();
//! while let Some(payload) = frames.next().await {
//!     if let Some(event) = decode(&payload?) {
//!         println!("{event:?}");
//!     }
//! }
//! ```

mod decoder;
mod frame;

pub use decoder::{decode, StreamEvent, UNKNOWN_ERROR_REASON};
pub use frame::{frames, FrameReader};
