//! Chatstream CLI
//!
//! Sends one message to a chat room and prints the reply as it streams in.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question in the default room
//! chatstream "What is 2+2?"
//!
//! # Pick the room, provider and model
//! chatstream --room 5b0c6f0e --provider Anthropic --model claude-3-haiku-20240307 "Hi"
//!
//! # List the models a provider offers
//! chatstream --provider OpenAI --list-models
//!
//! # With verbose logging
//! RUST_LOG=debug chatstream "Hi"
//! ```
//!
//! # Environment Variables
//!
//! - `CHATSTREAM_BASE_URL`: Completions API root (default: `http://localhost:8000/api/`)
//! - `CHATSTREAM_ROOM`, `CHATSTREAM_PROVIDER`, `CHATSTREAM_MODEL`: Defaults for the flags
//! - `CHATSTREAM_IDLE_TIMEOUT`: Milliseconds of silence before giving up (0 = never)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGINT (Ctrl-C): Cancels the in-flight stream; the partial reply is kept

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use chatstream_core::{
    load_config, ClientConfig, Dispatcher, DispatcherConfig, HttpTransport, Room, RoomUpdate,
};

/// Stream a chat completion into a room
#[derive(Debug, Parser)]
#[command(name = "chatstream", version, about)]
struct Args {
    /// Message to send
    #[arg(required_unless_present = "list_models")]
    message: Option<String>,

    /// Room identifier
    #[arg(long, env = "CHATSTREAM_ROOM", default_value = "default")]
    room: String,

    /// Provider identifier
    #[arg(long, env = "CHATSTREAM_PROVIDER", default_value = "OpenAI")]
    provider: String,

    /// Model identifier
    #[arg(long, env = "CHATSTREAM_MODEL", default_value = "gpt-4o")]
    model: String,

    /// System prompt sent with the turn
    #[arg(long, default_value = "")]
    system_prompt: String,

    /// Completions API root (overrides environment and config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/chatstream/config.toml)
    #[arg(long, env = "CHATSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// List the provider's models and exit
    #[arg(long)]
    list_models: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chatstream=info".parse()?)
                .add_directive("chatstream_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    // Config is read before the runtime starts
    let mut config = load_config(args.config.as_deref())?;
    if let Some(base_url) = &args.base_url {
        config.base_url.clone_from(base_url);
        config.validate()?;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(run(args, config))
}

async fn run(args: Args, config: ClientConfig) -> anyhow::Result<()> {
    let transport = HttpTransport::new(&config)?;

    if args.list_models {
        let models = transport.list_models(&args.provider).await?;
        let mut stdout = tokio::io::stdout();
        for model in models {
            stdout.write_all(format!("{model}\n").as_bytes()).await?;
        }
        stdout.flush().await?;
        return Ok(());
    }

    let message = args.message.context("a message is required")?;

    if !transport.health_check().await {
        warn!(base_url = %config.base_url, "Completions API not reachable; trying anyway");
    }

    let (tx, rx) = mpsc::channel(config.update_channel_capacity);
    let dispatcher = Arc::new(
        Dispatcher::new(transport, DispatcherConfig::from(&config)).with_updates(tx),
    );
    let room = Room::new(args.room, args.provider, args.model)
        .with_system_prompt(args.system_prompt);

    let printer = tokio::spawn(print_updates(rx));

    // Ctrl-C cancels the stream instead of killing the process
    let interrupt = {
        let dispatcher = Arc::clone(&dispatcher);
        let room_id = room.id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(room = %room_id, "Interrupt received, cancelling stream");
                dispatcher.cancel(&room_id);
            }
        })
    };

    let result = dispatcher.send(&room, message).await;

    // Release every dispatcher handle so the update channel closes
    interrupt.abort();
    let _ = interrupt.await;
    drop(dispatcher);
    printer.await.context("update printer panicked")??;

    let outcome = result.with_context(|| format!("turn in room {} failed", room.id))?;
    info!(
        room = %outcome.room,
        chunks = outcome.chunks,
        elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
        input_tokens = outcome.message.input_tokens,
        output_tokens = outcome.message.output_tokens,
        "Turn complete"
    );
    Ok(())
}

/// Print streamed text to stdout and failures to stderr
async fn print_updates(mut rx: mpsc::Receiver<RoomUpdate>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut printed = false;

    while let Some(update) = rx.recv().await {
        match update {
            RoomUpdate::Token { text, .. } => {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
                printed = true;
            }
            RoomUpdate::StreamEnd { message, .. } => {
                // A reply without chunks arrives whole
                if !printed {
                    stdout.write_all(message.content.as_bytes()).await?;
                }
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            RoomUpdate::StreamError { reason, .. } => {
                if printed {
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                stderr
                    .write_all(format!("[interrupted: {reason}]\n").as_bytes())
                    .await?;
            }
            RoomUpdate::UserMessage { .. } | RoomUpdate::PhaseChanged { .. } => {}
        }
    }
    Ok(())
}
