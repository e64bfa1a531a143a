//! Transport Layer
//!
//! Provides abstraction over how completion streams are opened:
//! - [`HttpTransport`]: reqwest against the completions API
//! - Any other [`CompletionTransport`] (tests inject scripted fragment sources)

pub mod http;
pub mod traits;

pub use http::HttpTransport;
pub use traits::{ByteStream, CompletionRequest, CompletionTransport, TransportError};
