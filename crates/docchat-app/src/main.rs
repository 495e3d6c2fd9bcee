//! docchat binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Build the conversation store (fresh, or from a stored conversation)
//! 3. Replay a recorded answer stream through the stream driver over a
//!    channel, the way a network transport would deliver it
//! 4. Print the resulting conversation as JSON

mod cli;

use clap::Parser;
use tokio::sync::mpsc;

use docchat_chat::{ConversationPayload, ConversationStore, StreamDriver, TransportEvent};
use docchat_core::config::DocchatConfig;

use cli::CliArgs;

/// Split `text` into pieces of at most `size` bytes without cutting a
/// character in half.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > size {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Send the chunks in order, then either close the channel or report a
/// dropped connection after `fail_after` chunks.
async fn replay_transport(
    chunks: Vec<String>,
    fail_after: Option<usize>,
    tx: mpsc::Sender<TransportEvent>,
) {
    for (sent, chunk) in chunks.into_iter().enumerate() {
        if fail_after == Some(sent) {
            let _ = tx
                .send(TransportEvent::Failed("connection dropped".to_string()))
                .await;
            return;
        }
        if tx.send(TransportEvent::Chunk(chunk)).await.is_err() {
            tracing::debug!("Receiver closed, stopping replay");
            return;
        }
    }
}

fn load_store(
    args: &CliArgs,
    config: &DocchatConfig,
    driver: &StreamDriver,
) -> Result<ConversationStore, Box<dyn std::error::Error>> {
    match args.conversation {
        Some(ref path) => {
            let raw = std::fs::read_to_string(path)?;
            let payload: ConversationPayload = serde_json::from_str(&raw)?;
            let store = ConversationStore::from_payload(
                &payload,
                driver.resolver(),
                config.chat.max_message_length,
            )?;
            tracing::info!(path = %path.display(), turns = store.len(), "Conversation loaded");
            Ok(store)
        }
        None => Ok(ConversationStore::from_config(&config.chat)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = DocchatConfig::load_or_default(&config_file);

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting docchat v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    let mut driver = StreamDriver::from_config(&config);
    let mut store = load_store(&args, &config, &driver)?;

    // Transport.
    let transcript = std::fs::read_to_string(&args.transcript)?;
    let chunks = split_chunks(&transcript, args.chunk_size);
    tracing::info!(chunks = chunks.len(), "Replaying transcript");

    let (tx, rx) = mpsc::channel(16);
    let replay = tokio::spawn(replay_transport(chunks, args.fail_after, tx));

    let outcome = driver
        .drive(&mut store, &args.question, args.documents.clone(), rx)
        .await?;
    replay.await?;
    tracing::info!(?outcome, "Exchange finished");

    println!("{}", serde_json::to_string_pretty(store.snapshot())?);
    Ok(())
}
